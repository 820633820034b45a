//! Router container launch.
//!
//! `weave launch` first classifies whatever already holds the router
//! container name, and only then touches host networking. A name held by
//! another image, or a router that is already running, aborts the launch
//! before the bridge or firewall are modified.

use weave_common::{MacAddr, WeaveConfig, WeaveError, WeaveResult};
use weave_net::{NetworkControl, PacketFilter, attach, setup_fabric};

use crate::runtime::{ContainerInfo, ContainerRuntime, RunSpec};

/// What currently holds the router container name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterState {
    /// No container by that name.
    Absent,
    /// A running router from the configured image.
    RunningThisImage,
    /// A stopped router from the configured image.
    StoppedThisImage,
    /// Some other image holds the name.
    OccupiedByOther {
        /// The image it was created from.
        image: String,
        /// Whether it is running.
        running: bool,
    },
}

impl RouterState {
    /// Classify an inspect result against the configured router image.
    #[must_use]
    pub fn classify(info: Option<&ContainerInfo>, image: &str) -> Self {
        match info {
            None => Self::Absent,
            Some(info) if same_image(&info.image, image) => {
                if info.running {
                    Self::RunningThisImage
                } else {
                    Self::StoppedThisImage
                }
            }
            Some(info) => Self::OccupiedByOther {
                image: info.image.clone(),
                running: info.running,
            },
        }
    }
}

/// Compare image references, treating a missing tag as `:latest`.
#[must_use]
pub fn same_image(a: &str, b: &str) -> bool {
    with_tag(a) == with_tag(b)
}

fn with_tag(reference: &str) -> String {
    // A registry port also contains ':', so only look past the last '/'.
    let last = reference.rsplit('/').next().unwrap_or(reference);
    if last.contains(':') || last.contains('@') {
        reference.to_string()
    } else {
        format!("{reference}:latest")
    }
}

/// A router that was started and attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launched {
    /// Router container id.
    pub container_id: String,
    /// Peer name handed to the router: the bridge hardware address.
    pub peer_name: MacAddr,
    /// Router pid on the host.
    pub pid: u32,
    /// Host end of the router's veth pair.
    pub host_interface: String,
}

/// Starts the router container and wires it onto the bridge.
pub struct Launcher<'a> {
    net: &'a dyn NetworkControl,
    filter: &'a dyn PacketFilter,
    runtime: &'a dyn ContainerRuntime,
    config: &'a WeaveConfig,
}

impl<'a> Launcher<'a> {
    /// Create a launcher over the given collaborators.
    pub fn new(
        net: &'a dyn NetworkControl,
        filter: &'a dyn PacketFilter,
        runtime: &'a dyn ContainerRuntime,
        config: &'a WeaveConfig,
    ) -> Self {
        Self {
            net,
            filter,
            runtime,
            config,
        }
    }

    /// Inspect the router container name.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be queried.
    pub async fn state(&self) -> WeaveResult<RouterState> {
        let info = self.runtime.inspect(&self.config.container_name).await?;
        Ok(RouterState::classify(info.as_ref(), &self.config.image))
    }

    /// Launch the router, passing `peers` through to it.
    ///
    /// # Errors
    ///
    /// Returns [`WeaveError::StateConflict`] if the name is taken, and any
    /// error from fabric setup, the runtime or attachment.
    pub async fn launch(&self, peers: &[String]) -> WeaveResult<Launched> {
        let name = &self.config.container_name;

        match self.state().await? {
            RouterState::Absent => {}
            RouterState::RunningThisImage => {
                return Err(WeaveError::StateConflict {
                    message: "Weave is already running.".to_string(),
                });
            }
            RouterState::StoppedThisImage => {
                tracing::info!(name = %name, "Removing stopped router container");
                self.runtime.remove(name).await?;
            }
            RouterState::OccupiedByOther { image, running } => {
                tracing::debug!(name = %name, %image, running, "Router name is taken");
                let message = if running {
                    format!("Found another running container named '{name}'. Aborting.")
                } else {
                    format!("Found another container named '{name}'. Aborting.")
                };
                return Err(WeaveError::StateConflict { message });
            }
        }

        let bridge = setup_fabric(self.net, self.filter, self.config).await?;

        let spec = self.run_spec(bridge.mac, peers);
        let container_id = self.runtime.run(&spec).await?;
        tracing::debug!(%container_id, peer_name = %bridge.mac, "Router container started");

        let pid = self.router_pid(&container_id).await?;
        let host_interface = attach(
            self.net,
            &bridge.name,
            pid,
            &self.config.container_ifname,
            self.config.mtu,
        )
        .await?;

        tracing::info!(%container_id, pid, bridge = %bridge.name, "Router launched");
        Ok(Launched {
            container_id,
            peer_name: bridge.mac,
            pid,
            host_interface,
        })
    }

    fn run_spec(&self, peer_name: MacAddr, peers: &[String]) -> RunSpec {
        let mut args = vec![
            "-iface".to_string(),
            self.config.container_ifname.clone(),
            "-name".to_string(),
            peer_name.to_string(),
        ];
        args.extend(peers.iter().cloned());

        RunSpec {
            name: self.config.container_name.clone(),
            image: self.config.image.clone(),
            host_network: true,
            cap_add: self.config.router_caps.clone(),
            args,
        }
    }

    async fn router_pid(&self, container_id: &str) -> WeaveResult<u32> {
        match self.runtime.inspect(container_id).await? {
            None => Err(WeaveError::ContainerUnknown {
                name: container_id.to_string(),
            }),
            Some(info) if info.pid == 0 => Err(WeaveError::ContainerNotRunning {
                name: container_id.to_string(),
            }),
            Some(info) => Ok(info.pid),
        }
    }
}
