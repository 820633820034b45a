//! Virtual ethernet pair management.
//!
//! Each container gets one veth pair. The host end is named after the
//! container interface and the container's pid (`vethwepl4321`), so it is
//! unique among running containers and can be traced back to its owner.

use weave_common::{WeaveError, WeaveResult};

use crate::netctl::NetworkControl;
use crate::netns::Netns;
use crate::offload::disable_offload_all;

/// Longest interface name the kernel accepts (`IFNAMSIZ - 1`).
pub const MAX_IFNAME_LEN: usize = 15;

/// Names of a container's veth pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VethPair {
    /// Host-side interface name.
    pub host: String,
    /// Transient name of the container side before it is renamed.
    pub guest: String,
    /// Final container-side interface name.
    pub container: String,
}

impl VethPair {
    /// Derive the pair names for the container with process id `pid`.
    ///
    /// # Errors
    ///
    /// Returns an error if a derived name exceeds the kernel limit.
    pub fn for_container(container_ifname: &str, pid: u32) -> WeaveResult<Self> {
        let pair = Self {
            host: format!("v{container_ifname}pl{pid}"),
            guest: format!("v{container_ifname}pg{pid}"),
            container: container_ifname.to_string(),
        };

        for name in [&pair.host, &pair.guest, &pair.container] {
            if name.is_empty() || name.len() > MAX_IFNAME_LEN {
                return Err(WeaveError::creation(
                    format!("veth pair for pid {pid}"),
                    format!("interface name {name:?} must be 1-{MAX_IFNAME_LEN} bytes"),
                ));
            }
        }
        Ok(pair)
    }
}

/// Attach the container owning `pid` to `bridge`.
///
/// Creates the veth pair at `mtu`, enslaves the host end to the bridge,
/// moves the other end into the container's namespace as
/// `container_ifname` and disables offload on every interface there.
/// Returns the host-side interface name.
///
/// If pair creation fails nothing is left behind. A failure after that
/// deletes the host end, which also removes its peer.
pub async fn attach(
    net: &dyn NetworkControl,
    bridge: &str,
    pid: u32,
    container_ifname: &str,
    mtu: u32,
) -> WeaveResult<String> {
    let pair = VethPair::for_container(container_ifname, pid)?;
    tracing::debug!(bridge, pid, host = %pair.host, "Attaching container");

    net.add_veth(&pair.host, &pair.guest, mtu).await?;

    if let Err(e) = wire(net, bridge, pid, &pair).await {
        tracing::warn!(host = %pair.host, error = %e, "Attach failed, removing veth pair");
        if let Err(cleanup) = net.delete_link(Netns::Host, &pair.host).await {
            tracing::warn!(host = %pair.host, error = %cleanup, "Failed to remove veth pair");
        }
        return Err(e);
    }

    tracing::info!(bridge, pid, host = %pair.host, container = %pair.container, "Container attached");
    Ok(pair.host)
}

async fn wire(net: &dyn NetworkControl, bridge: &str, pid: u32, pair: &VethPair) -> WeaveResult<()> {
    net.set_master(&pair.host, bridge).await?;
    net.set_up(Netns::Host, &pair.host).await?;

    let ns = Netns::Pid(pid);
    if net.link_exists(ns, &pair.container).await? {
        tracing::warn!(%ns, interface = %pair.container, "Removing stale interface");
        net.delete_link(ns, &pair.container).await?;
    }

    net.move_to_netns(&pair.guest, pid).await?;
    net.rename(ns, &pair.guest, &pair.container).await?;
    net.set_up(ns, &pair.container).await?;

    disable_offload_all(net, ns).await?;
    Ok(())
}
