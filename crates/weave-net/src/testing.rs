//! In-memory [`NetworkControl`] for tests that must not touch the host.
//!
//! [`FakeFilter`] does the same for [`PacketFilter`].
//!
//! The network fake models the kernel behaviour the workflows rely on: names are
//! unique per namespace, deleting one veth end removes its peer, and a
//! bridge takes the lowest MTU of its ports at the time a port joins.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use weave_common::{MacAddr, WeaveError, WeaveResult};

use crate::firewall::{FirewallRule, PacketFilter, Table};
use crate::netctl::{LinkInfo, NetworkControl, OffloadOutcome};
use crate::netns::Netns;

/// Kind of fake device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Loopback device.
    Loopback,
    /// Bridge device.
    Bridge,
    /// Dummy device.
    Dummy,
    /// One end of a veth pair.
    Veth,
}

/// A fake device.
#[derive(Debug, Clone)]
pub struct FakeLink {
    /// Device kind.
    pub kind: LinkKind,
    /// Hardware address.
    pub mac: Option<MacAddr>,
    /// MTU.
    pub mtu: u32,
    /// Admin state.
    pub up: bool,
    /// Bridge this device is enslaved to.
    pub master: Option<String>,
    /// Peer of a veth end, as (namespace, name).
    pub peer: Option<(Netns, String)>,
    /// Whether offload was disabled.
    pub offload_disabled: bool,
}

impl FakeLink {
    fn new(kind: LinkKind, mtu: u32) -> Self {
        Self {
            kind,
            mac: (kind != LinkKind::Loopback).then(MacAddr::random_local),
            mtu,
            up: false,
            master: None,
            peer: None,
            offload_disabled: false,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    links: BTreeMap<(Netns, String), FakeLink>,
    namespaces: BTreeSet<u32>,
    routes: BTreeSet<(Netns, String, String)>,
    failures: BTreeSet<String>,
    ops: Vec<String>,
}

impl State {
    fn fail_if_armed(&self, op: &str) -> WeaveResult<()> {
        if self.failures.contains(op) {
            return Err(WeaveError::NetworkControl {
                message: format!("injected failure in {op}"),
            });
        }
        Ok(())
    }

    fn check_ns(&self, ns: Netns) -> WeaveResult<()> {
        match ns {
            Netns::Pid(pid) if !self.namespaces.contains(&pid) => {
                Err(WeaveError::NetworkControl {
                    message: format!("nsenter: cannot open /proc/{pid}/ns/net: No such file"),
                })
            }
            _ => Ok(()),
        }
    }

    fn link_mut(&mut self, ns: Netns, name: &str) -> WeaveResult<&mut FakeLink> {
        self.links
            .get_mut(&(ns, name.to_string()))
            .ok_or_else(|| WeaveError::NetworkControl {
                message: format!("Cannot find device \"{name}\" in {ns}"),
            })
    }

    fn exists(&self, ns: Netns, name: &str) -> bool {
        self.links.contains_key(&(ns, name.to_string()))
    }

    fn insert_new(&mut self, name: &str, link: FakeLink) -> WeaveResult<()> {
        if self.exists(Netns::Host, name) {
            return Err(WeaveError::creation(
                format!("interface {name}"),
                "RTNETLINK answers: File exists",
            ));
        }
        self.links.insert((Netns::Host, name.to_string()), link);
        Ok(())
    }
}

/// In-memory network used by tests.
#[derive(Debug)]
pub struct FakeNetwork {
    state: Mutex<State>,
    offload_available: bool,
}

impl Default for FakeNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeNetwork {
    /// An empty host with `ethtool` installed.
    #[must_use]
    pub fn new() -> Self {
        let mut state = State::default();
        state
            .links
            .insert((Netns::Host, "lo".to_string()), FakeLink::new(LinkKind::Loopback, 65536));
        Self {
            state: Mutex::new(state),
            offload_available: true,
        }
    }

    /// An empty host without `ethtool`.
    #[must_use]
    pub fn without_offload_tool() -> Self {
        Self {
            offload_available: false,
            ..Self::new()
        }
    }

    /// Register a container network namespace owned by `pid`, holding only `lo`.
    pub fn add_namespace(&self, pid: u32) {
        let mut state = self.state.lock();
        state.namespaces.insert(pid);
        state.links.insert(
            (Netns::Pid(pid), "lo".to_string()),
            FakeLink::new(LinkKind::Loopback, 65536),
        );
    }

    /// Tear down a namespace and every device in it.
    pub fn remove_namespace(&self, pid: u32) {
        let mut state = self.state.lock();
        state.namespaces.remove(&pid);
        let doomed: Vec<_> = state
            .links
            .keys()
            .filter(|(ns, _)| *ns == Netns::Pid(pid))
            .cloned()
            .collect();
        for key in doomed {
            if let Some(link) = state.links.remove(&key) {
                if let Some(peer) = link.peer {
                    state.links.remove(&peer);
                }
            }
        }
    }

    /// Make every subsequent call of the named operation fail.
    pub fn fail(&self, op: &str) {
        self.state.lock().failures.insert(op.to_string());
    }

    /// Stop failing the named operation.
    pub fn heal(&self, op: &str) {
        self.state.lock().failures.remove(op);
    }

    /// Look up a device.
    #[must_use]
    pub fn link(&self, ns: Netns, name: &str) -> Option<FakeLink> {
        self.state.lock().links.get(&(ns, name.to_string())).cloned()
    }

    /// Names of all devices in a namespace.
    #[must_use]
    pub fn names(&self, ns: Netns) -> Vec<String> {
        self.state
            .lock()
            .links
            .keys()
            .filter(|(n, _)| *n == ns)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Installed routes as (namespace, cidr, device).
    #[must_use]
    pub fn routes(&self) -> Vec<(Netns, String, String)> {
        self.state.lock().routes.iter().cloned().collect()
    }

    /// Every mutating operation performed, in order.
    #[must_use]
    pub fn ops(&self) -> Vec<String> {
        self.state.lock().ops.clone()
    }

    /// Insert a device directly, bypassing the operation log.
    pub fn seed_link(&self, ns: Netns, name: &str, kind: LinkKind, mtu: u32) {
        self.state
            .lock()
            .links
            .insert((ns, name.to_string()), FakeLink::new(kind, mtu));
    }
}

#[async_trait]
impl NetworkControl for FakeNetwork {
    async fn link_exists(&self, ns: Netns, name: &str) -> WeaveResult<bool> {
        let state = self.state.lock();
        state.check_ns(ns)?;
        Ok(state.exists(ns, name))
    }

    async fn link_info(&self, ns: Netns, name: &str) -> WeaveResult<LinkInfo> {
        let mut state = self.state.lock();
        state.check_ns(ns)?;
        let link = state.link_mut(ns, name)?;
        Ok(LinkInfo {
            name: name.to_string(),
            mac: link.mac,
            mtu: link.mtu,
            up: link.up,
        })
    }

    async fn list_links(&self, ns: Netns) -> WeaveResult<Vec<String>> {
        self.state.lock().check_ns(ns)?;
        Ok(self.names(ns))
    }

    async fn add_bridge(&self, name: &str) -> WeaveResult<()> {
        let mut state = self.state.lock();
        state.fail_if_armed("add_bridge")?;
        state.insert_new(name, FakeLink::new(LinkKind::Bridge, 1500))?;
        state.ops.push(format!("add_bridge {name}"));
        Ok(())
    }

    async fn add_dummy(&self, name: &str, mtu: u32) -> WeaveResult<()> {
        let mut state = self.state.lock();
        state.fail_if_armed("add_dummy")?;
        state.insert_new(name, FakeLink::new(LinkKind::Dummy, mtu))?;
        state.ops.push(format!("add_dummy {name} mtu {mtu}"));
        Ok(())
    }

    async fn add_veth(&self, host: &str, peer: &str, mtu: u32) -> WeaveResult<()> {
        let mut state = self.state.lock();
        state.fail_if_armed("add_veth")?;
        if state.exists(Netns::Host, host) || state.exists(Netns::Host, peer) {
            return Err(WeaveError::creation(
                format!("veth pair {host}/{peer}"),
                "RTNETLINK answers: File exists",
            ));
        }
        let mut host_end = FakeLink::new(LinkKind::Veth, mtu);
        host_end.peer = Some((Netns::Host, peer.to_string()));
        let mut peer_end = FakeLink::new(LinkKind::Veth, mtu);
        peer_end.peer = Some((Netns::Host, host.to_string()));
        state.links.insert((Netns::Host, host.to_string()), host_end);
        state.links.insert((Netns::Host, peer.to_string()), peer_end);
        state.ops.push(format!("add_veth {host} {peer} mtu {mtu}"));
        Ok(())
    }

    async fn delete_link(&self, ns: Netns, name: &str) -> WeaveResult<()> {
        let mut state = self.state.lock();
        state.fail_if_armed("delete_link")?;
        state.check_ns(ns)?;
        let link = state
            .links
            .remove(&(ns, name.to_string()))
            .ok_or_else(|| WeaveError::NetworkControl {
                message: format!("Cannot find device \"{name}\""),
            })?;
        if let Some(peer) = link.peer {
            state.links.remove(&peer);
        }
        state.ops.push(format!("delete_link {ns} {name}"));
        Ok(())
    }

    async fn set_address(&self, name: &str, mac: MacAddr) -> WeaveResult<()> {
        let mut state = self.state.lock();
        state.fail_if_armed("set_address")?;
        state.link_mut(Netns::Host, name)?.mac = Some(mac);
        state.ops.push(format!("set_address {name} {mac}"));
        Ok(())
    }

    async fn set_master(&self, name: &str, master: &str) -> WeaveResult<()> {
        let mut state = self.state.lock();
        state.fail_if_armed("set_master")?;
        if state.link_mut(Netns::Host, master)?.kind != LinkKind::Bridge {
            return Err(WeaveError::NetworkControl {
                message: format!("{master} is not a bridge"),
            });
        }
        state.link_mut(Netns::Host, name)?.master = Some(master.to_string());

        let lowest = state
            .links
            .iter()
            .filter(|((ns, _), link)| ns.is_host() && link.master.as_deref() == Some(master))
            .map(|(_, link)| link.mtu)
            .min();
        if let Some(lowest) = lowest {
            state.link_mut(Netns::Host, master)?.mtu = lowest;
        }
        state.ops.push(format!("set_master {name} {master}"));
        Ok(())
    }

    async fn set_up(&self, ns: Netns, name: &str) -> WeaveResult<()> {
        let mut state = self.state.lock();
        state.fail_if_armed("set_up")?;
        state.check_ns(ns)?;
        state.link_mut(ns, name)?.up = true;
        state.ops.push(format!("set_up {ns} {name}"));
        Ok(())
    }

    async fn move_to_netns(&self, name: &str, pid: u32) -> WeaveResult<()> {
        let mut state = self.state.lock();
        state.fail_if_armed("move_to_netns")?;
        let target = Netns::Pid(pid);
        state.check_ns(target)?;
        if state.exists(target, name) {
            return Err(WeaveError::NetworkControl {
                message: format!("{name} already exists in {target}"),
            });
        }
        let link = state
            .links
            .remove(&(Netns::Host, name.to_string()))
            .ok_or_else(|| WeaveError::NetworkControl {
                message: format!("Cannot find device \"{name}\""),
            })?;
        if let Some(peer) = &link.peer {
            if let Some(peer_link) = state.links.get_mut(peer) {
                peer_link.peer = Some((target, name.to_string()));
            }
        }
        state.links.insert((target, name.to_string()), link);
        state.ops.push(format!("move_to_netns {name} {pid}"));
        Ok(())
    }

    async fn rename(&self, ns: Netns, from: &str, to: &str) -> WeaveResult<()> {
        let mut state = self.state.lock();
        state.fail_if_armed("rename")?;
        state.check_ns(ns)?;
        if state.exists(ns, to) {
            return Err(WeaveError::NetworkControl {
                message: format!("{to} already exists in {ns}"),
            });
        }
        let link = state
            .links
            .remove(&(ns, from.to_string()))
            .ok_or_else(|| WeaveError::NetworkControl {
                message: format!("Cannot find device \"{from}\""),
            })?;
        if let Some(peer) = &link.peer {
            if let Some(peer_link) = state.links.get_mut(peer) {
                peer_link.peer = Some((ns, to.to_string()));
            }
        }
        state.links.insert((ns, to.to_string()), link);
        state.ops.push(format!("rename {ns} {from} {to}"));
        Ok(())
    }

    async fn disable_offload(&self, ns: Netns, name: &str) -> WeaveResult<OffloadOutcome> {
        let mut state = self.state.lock();
        state.fail_if_armed("disable_offload")?;
        state.check_ns(ns)?;
        if !self.offload_available {
            state.link_mut(ns, name)?;
            return Ok(OffloadOutcome::Skipped);
        }
        state.link_mut(ns, name)?.offload_disabled = true;
        state.ops.push(format!("disable_offload {ns} {name}"));
        Ok(OffloadOutcome::Disabled)
    }

    async fn replace_route(&self, ns: Netns, cidr: &str, dev: &str) -> WeaveResult<()> {
        let mut state = self.state.lock();
        state.fail_if_armed("replace_route")?;
        state.check_ns(ns)?;
        state.link_mut(ns, dev)?;
        state
            .routes
            .insert((ns, cidr.to_string(), dev.to_string()));
        state.ops.push(format!("replace_route {ns} {cidr} {dev}"));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct FilterState {
    rules: Vec<FirewallRule>,
    chains: BTreeSet<(&'static str, String)>,
    fail_appends: bool,
}

/// In-memory packet filter used by tests. Appending never deduplicates,
/// so a duplicate rule shows up in [`FakeFilter::count`].
#[derive(Debug, Default)]
pub struct FakeFilter {
    state: Mutex<FilterState>,
}

impl FakeFilter {
    /// How many copies of `rule` are installed.
    #[must_use]
    pub fn count(&self, rule: &FirewallRule) -> usize {
        self.state.lock().rules.iter().filter(|r| *r == rule).count()
    }

    /// Every installed rule, in append order.
    #[must_use]
    pub fn rules(&self) -> Vec<FirewallRule> {
        self.state.lock().rules.clone()
    }

    /// Whether a user-defined chain exists.
    #[must_use]
    pub fn has_chain(&self, table: Table, chain: &str) -> bool {
        self.state
            .lock()
            .chains
            .contains(&(table.as_str(), chain.to_string()))
    }

    /// Make every subsequent append fail.
    pub fn fail_appends(&self) {
        self.state.lock().fail_appends = true;
    }
}

#[async_trait]
impl PacketFilter for FakeFilter {
    async fn check(&self, rule: &FirewallRule) -> WeaveResult<bool> {
        Ok(self.count(rule) > 0)
    }

    async fn append(&self, rule: &FirewallRule) -> WeaveResult<()> {
        let mut state = self.state.lock();
        if state.fail_appends {
            return Err(WeaveError::creation(
                format!("rule {rule}"),
                "iptables: Resource temporarily unavailable.",
            ));
        }
        state.rules.push(rule.clone());
        Ok(())
    }

    async fn new_chain(&self, table: Table, chain: &str) -> WeaveResult<()> {
        let inserted = self
            .state
            .lock()
            .chains
            .insert((table.as_str(), chain.to_string()));
        if inserted {
            Ok(())
        } else {
            Err(WeaveError::creation(
                format!("chain {table}/{chain}"),
                "iptables: Chain already exists.",
            ))
        }
    }
}
