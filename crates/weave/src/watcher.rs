//! Lifecycle watcher behind `weave helper`.
//!
//! Containers that the runtime networks onto the weave bridge come up with
//! transmit checksum offload enabled and no route for the overlay range.
//! The watcher follows start events and fixes both inside each new
//! container's namespace. One bad event never stops the loop.

use std::future::Future;

use futures::{Stream, StreamExt};
use ipnet::Ipv4Net;

use weave_common::{WeaveError, WeaveResult};
use weave_net::{NetworkControl, Netns, OffloadOutcome};

use crate::runtime::{ContainerRuntime, EventKind, LifecycleEvent};

/// What the watcher did with one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Not a start event.
    Ignored,
    /// The container has no network address.
    Skipped,
    /// Offload and route were adjusted.
    Adjusted(OffloadOutcome),
}

/// Tally returned when the watch loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    /// Events received.
    pub seen: u64,
    /// Containers adjusted.
    pub actioned: u64,
    /// Started containers without an address.
    pub skipped: u64,
    /// Events that could not be read or handled.
    pub failed: u64,
}

/// Follows container starts and adjusts their networking.
pub struct Watcher<'a> {
    net: &'a dyn NetworkControl,
    runtime: &'a dyn ContainerRuntime,
    interface: String,
    route: Ipv4Net,
}

impl<'a> Watcher<'a> {
    /// Watch for containers whose `interface` should carry `route`.
    /// Host bits in `route` are cleared.
    pub fn new(
        net: &'a dyn NetworkControl,
        runtime: &'a dyn ContainerRuntime,
        interface: impl Into<String>,
        route: Ipv4Net,
    ) -> Self {
        Self {
            net,
            runtime,
            interface: interface.into(),
            route: route.trunc(),
        }
    }

    /// Handle a single event.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be inspected or its
    /// namespace cannot be adjusted.
    pub async fn handle(&self, event: &LifecycleEvent) -> WeaveResult<EventOutcome> {
        if event.kind != EventKind::Start {
            return Ok(EventOutcome::Ignored);
        }

        let id = &event.container_id;
        let info = self
            .runtime
            .inspect(id)
            .await?
            .ok_or_else(|| WeaveError::ContainerUnknown { name: id.clone() })?;

        let Some(address) = info.ip_address else {
            tracing::debug!(container = %id, "Container has no address, skipping");
            return Ok(EventOutcome::Skipped);
        };
        if info.pid == 0 {
            return Err(WeaveError::ContainerNotRunning { name: id.clone() });
        }

        let ns = Netns::Pid(info.pid);
        let offload = self.net.disable_offload(ns, &self.interface).await?;
        self.net
            .replace_route(ns, &self.route.to_string(), &self.interface)
            .await?;

        tracing::info!(
            container = %id,
            %address,
            interface = %self.interface,
            route = %self.route,
            ?offload,
            "Adjusted container networking"
        );
        Ok(EventOutcome::Adjusted(offload))
    }

    /// Process `events` in arrival order until the stream ends or
    /// `shutdown` completes.
    pub async fn run<S, F>(&self, mut events: S, shutdown: F) -> WatchSummary
    where
        S: Stream<Item = WeaveResult<LifecycleEvent>> + Unpin,
        F: Future<Output = ()>,
    {
        let mut summary = WatchSummary::default();
        tokio::pin!(shutdown);

        tracing::info!(interface = %self.interface, route = %self.route, "Watching container events");
        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => {
                    tracing::info!("Shutdown requested, stopping watcher");
                    break;
                }
                next = events.next() => match next {
                    None => {
                        tracing::info!("Event stream closed");
                        break;
                    }
                    Some(Err(e)) => {
                        summary.failed += 1;
                        tracing::warn!(error = %e, "Unreadable event");
                    }
                    Some(Ok(event)) => {
                        summary.seen += 1;
                        match self.handle(&event).await {
                            Ok(EventOutcome::Ignored) => {}
                            Ok(EventOutcome::Skipped) => summary.skipped += 1,
                            Ok(EventOutcome::Adjusted(_)) => summary.actioned += 1,
                            Err(e) => {
                                summary.failed += 1;
                                tracing::warn!(
                                    container = %event.container_id,
                                    error = %e,
                                    "Failed to adjust container"
                                );
                            }
                        }
                    }
                }
            }
        }

        tracing::debug!(?summary, "Watcher finished");
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRuntime, container};
    use weave_net::testing::{FakeNetwork, LinkKind};

    const ROUTE: &str = "10.2.0.0/16";

    fn start(id: &str) -> WeaveResult<LifecycleEvent> {
        Ok(LifecycleEvent::now(id, EventKind::Start))
    }

    /// A host with one networked container per pid, each holding `eth0`.
    fn host(pids: &[u32]) -> (FakeNetwork, FakeRuntime) {
        let net = FakeNetwork::new();
        let runtime = FakeRuntime::new();
        for &pid in pids {
            net.add_namespace(pid);
            net.seed_link(Netns::Pid(pid), "eth0", LinkKind::Veth, 1500);
            runtime.add_container(container(
                &format!("c{pid}"),
                &format!("app{pid}"),
                "nginx",
                pid,
                Some("10.2.1.1"),
            ));
        }
        (net, runtime)
    }

    fn watcher<'a>(net: &'a FakeNetwork, runtime: &'a FakeRuntime) -> Watcher<'a> {
        Watcher::new(net, runtime, "eth0", ROUTE.parse().unwrap())
    }

    #[tokio::test]
    async fn route_host_bits_are_cleared() {
        let (net, runtime) = host(&[100]);
        let w = Watcher::new(&net, &runtime, "eth0", "10.2.3.4/16".parse().unwrap());
        w.handle(&start("c100").unwrap()).await.unwrap();

        assert_eq!(
            net.routes(),
            vec![(Netns::Pid(100), "10.2.0.0/16".to_string(), "eth0".to_string())]
        );
    }

    #[tokio::test]
    async fn start_event_adjusts_container() {
        let (net, runtime) = host(&[100]);
        let outcome = watcher(&net, &runtime).handle(&start("c100").unwrap()).await.unwrap();

        assert_eq!(outcome, EventOutcome::Adjusted(OffloadOutcome::Disabled));
        assert!(net.link(Netns::Pid(100), "eth0").unwrap().offload_disabled);
        assert_eq!(
            net.routes(),
            vec![(Netns::Pid(100), ROUTE.to_string(), "eth0".to_string())]
        );
    }

    #[tokio::test]
    async fn other_events_are_ignored() {
        let (net, runtime) = host(&[100]);
        let w = watcher(&net, &runtime);
        for kind in [EventKind::Create, EventKind::Die, EventKind::Other("exec_start".into())] {
            let outcome = w.handle(&LifecycleEvent::now("c100", kind)).await.unwrap();
            assert_eq!(outcome, EventOutcome::Ignored);
        }
        assert!(net.ops().is_empty());
    }

    #[tokio::test]
    async fn containers_without_address_are_skipped() {
        let net = FakeNetwork::new();
        let runtime = FakeRuntime::new();
        net.add_namespace(7);
        runtime.add_container(container("host-net", "weave", "zettio/weave", 7, None));

        let outcome = watcher(&net, &runtime).handle(&start("host-net").unwrap()).await.unwrap();
        assert_eq!(outcome, EventOutcome::Skipped);
        assert!(net.ops().is_empty());
    }

    #[tokio::test]
    async fn missing_offload_tool_still_routes() {
        let net = FakeNetwork::without_offload_tool();
        let runtime = FakeRuntime::new();
        net.add_namespace(100);
        net.seed_link(Netns::Pid(100), "eth0", LinkKind::Veth, 1500);
        runtime.add_container(container("c100", "app", "nginx", 100, Some("10.2.1.1")));

        let outcome = watcher(&net, &runtime).handle(&start("c100").unwrap()).await.unwrap();
        assert_eq!(outcome, EventOutcome::Adjusted(OffloadOutcome::Skipped));
        assert_eq!(net.routes().len(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn failed_event_does_not_stop_the_loop() {
        let (net, runtime) = host(&[100, 200]);
        // The first container exits before the watcher reaches it.
        net.remove_namespace(100);

        let events = futures::stream::iter(vec![
            start("c100"),
            start("gone"),
            Err(WeaveError::Serialization("truncated event".to_string())),
            Ok(LifecycleEvent::now("c200", EventKind::Create)),
            start("c200"),
        ]);
        let summary = watcher(&net, &runtime)
            .run(events, std::future::pending())
            .await;

        assert_eq!(
            summary,
            WatchSummary {
                seen: 4,
                actioned: 1,
                skipped: 0,
                failed: 3,
            }
        );
        assert!(net.link(Netns::Pid(200), "eth0").unwrap().offload_disabled);
    }

    #[tokio::test]
    async fn shutdown_ends_an_idle_watch() {
        let (net, runtime) = host(&[]);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let watch = watcher(&net, &runtime);
        let run = watch.run(futures::stream::pending(), async {
            let _ = rx.await;
        });
        tx.send(()).unwrap();

        assert_eq!(run.await, WatchSummary::default());
    }

    #[tokio::test]
    async fn events_from_runtime_subscription() {
        let (net, runtime) = host(&[100]);
        runtime.set_events(vec![start("c100")]);

        let events = runtime.events().await.unwrap();
        let summary = watcher(&net, &runtime)
            .run(events, std::future::pending())
            .await;
        assert_eq!(summary.actioned, 1);
    }
}
