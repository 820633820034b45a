//! Linux bridge management.
//!
//! The weave bridge is created once per host and never deleted. Its
//! hardware address is random and lives only on the device itself; the
//! router reads it back on every launch to use as its peer name.

use weave_common::{MacAddr, WeaveConfig, WeaveError, WeaveResult};

use crate::netctl::NetworkControl;
use crate::netns::Netns;
use crate::offload::disable_offload_best_effort;

/// Identity of a live bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeInfo {
    /// Bridge name.
    pub name: String,
    /// Hardware address read back from the device.
    pub mac: MacAddr,
    /// Current MTU.
    pub mtu: u32,
    /// Whether this call created the bridge.
    pub created: bool,
}

/// Bridge manager for the overlay fabric.
#[derive(Debug, Clone)]
pub struct BridgeManager {
    /// Bridge name.
    name: String,
    /// Target MTU.
    mtu: u32,
    /// Name of the transient interface used to raise the MTU.
    dummy: String,
}

impl BridgeManager {
    /// Create a manager for bridge `name` with target `mtu`.
    pub fn new(name: impl Into<String>, mtu: u32) -> Self {
        let name = name.into();
        let dummy = format!("v{name}du");
        Self { name, mtu, dummy }
    }

    /// Create a manager from the weave configuration.
    #[must_use]
    pub fn from_config(config: &WeaveConfig) -> Self {
        Self::new(config.bridge.clone(), config.mtu)
            .with_dummy(format!("v{}du", config.container_ifname))
    }

    /// Override the transient interface name.
    #[must_use]
    pub fn with_dummy(mut self, dummy: impl Into<String>) -> Self {
        self.dummy = dummy.into();
        self
    }

    /// Get the bridge name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the target MTU.
    #[must_use]
    pub const fn mtu(&self) -> u32 {
        self.mtu
    }

    /// Ensure the bridge exists and is up.
    ///
    /// A missing bridge is created with a random locally administered
    /// address and its MTU raised to the target; an existing one is only
    /// brought up. Safe to call on every invocation.
    pub async fn ensure(&self, net: &dyn NetworkControl) -> WeaveResult<BridgeInfo> {
        let created = if net.link_exists(Netns::Host, &self.name).await? {
            tracing::debug!(name = %self.name, "Bridge already exists");
            false
        } else {
            self.create(net).await?;
            true
        };

        net.set_up(Netns::Host, &self.name).await?;

        let info = self.info(net).await?;
        let info = BridgeInfo { created, ..info };
        if info.mtu < self.mtu {
            tracing::warn!(
                name = %self.name,
                mtu = info.mtu,
                wanted = self.mtu,
                "Bridge MTU is below the configured value"
            );
        }
        Ok(info)
    }

    /// Read the live bridge's identity.
    pub async fn info(&self, net: &dyn NetworkControl) -> WeaveResult<BridgeInfo> {
        let link = net.link_info(Netns::Host, &self.name).await?;
        let mac = link.mac.ok_or_else(|| WeaveError::NetworkControl {
            message: format!("Bridge '{}' has no hardware address", self.name),
        })?;
        Ok(BridgeInfo {
            name: link.name,
            mac,
            mtu: link.mtu,
            created: false,
        })
    }

    /// Add an interface to the bridge.
    pub async fn add_interface(&self, net: &dyn NetworkControl, interface: &str) -> WeaveResult<()> {
        net.set_master(interface, &self.name).await?;
        tracing::debug!(bridge = %self.name, interface, "Interface added successfully");
        Ok(())
    }

    async fn create(&self, net: &dyn NetworkControl) -> WeaveResult<()> {
        tracing::debug!(name = %self.name, mtu = self.mtu, "Creating bridge");
        net.add_bridge(&self.name).await?;

        let mac = MacAddr::random_local();
        net.set_address(&self.name, mac).await?;

        self.raise_mtu(net).await?;
        disable_offload_best_effort(net, Netns::Host, &self.name).await;

        tracing::info!(name = %self.name, %mac, "Bridge created successfully");
        Ok(())
    }

    /// A bridge cannot be given an MTU above that of its ports, but it
    /// adopts the lowest port MTU when a port joins and keeps it after the
    /// port leaves. A throwaway high-MTU dummy port lifts the ceiling.
    async fn raise_mtu(&self, net: &dyn NetworkControl) -> WeaveResult<()> {
        net.add_dummy(&self.dummy, self.mtu).await?;
        let enslaved = self.add_interface(net, &self.dummy).await;
        let removed = net.delete_link(Netns::Host, &self.dummy).await;

        enslaved.map_err(|e| {
            WeaveError::creation(format!("bridge {}", self.name), format!("raising MTU: {e}"))
        })?;
        removed
    }
}
