//! # weave-net
//!
//! Host networking primitives for the weave overlay.
//!
//! This crate owns everything that touches kernel networking state: the
//! bridge, per-container veth pairs, offload settings and firewall rules.
//! All of it goes through the [`NetworkControl`] and [`PacketFilter`]
//! traits so the workflows can be exercised without root.

#![warn(missing_docs)]

pub mod bridge;
pub mod firewall;
pub mod gate;
pub mod netctl;
pub mod netns;
pub mod offload;
pub mod veth;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bridge::{BridgeInfo, BridgeManager};
pub use firewall::{
    FirewallRule, Iptables, PacketFilter, RuleOutcome, Table, ensure_rule, install_fabric_rules,
};
pub use gate::{Capabilities, ToolGate, check_privileges};
pub use netctl::{IpNetworkControl, LinkInfo, NetworkControl, OffloadOutcome};
pub use netns::Netns;
pub use offload::{OffloadReport, disable_offload_all};
pub use veth::{VethPair, attach};

use weave_common::{WeaveConfig, WeaveResult};

/// Ensure the bridge and the firewall rules it depends on.
///
/// This is the whole of `weave setup`, and the first mutating step of
/// `weave launch`.
pub async fn setup_fabric(
    net: &dyn NetworkControl,
    filter: &dyn PacketFilter,
    config: &WeaveConfig,
) -> WeaveResult<BridgeInfo> {
    let bridge = BridgeManager::from_config(config).ensure(net).await?;
    install_fabric_rules(filter, &bridge.name).await?;
    Ok(bridge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeFilter, FakeNetwork};

    #[tokio::test]
    async fn setup_is_idempotent() {
        let net = FakeNetwork::new();
        let filter = FakeFilter::default();
        let config = WeaveConfig::default().with_bridge("weave").with_mtu(65535);

        let first = setup_fabric(&net, &filter, &config).await.unwrap();
        let second = setup_fabric(&net, &filter, &config).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.mac, second.mac);
        assert_eq!(first.mtu, second.mtu);
        assert_eq!(filter.rules().len(), 2);
    }
}
