//! Kernel network control interface.
//!
//! Every bridge, veth and offload operation goes through [`NetworkControl`],
//! so the workflows built on top of it can run against an in-memory fake.
//! [`IpNetworkControl`] is the real implementation; it drives `ip`,
//! `ethtool` and `nsenter`.

use async_trait::async_trait;
use tokio::process::Command;

use weave_common::{MacAddr, WeaveError, WeaveResult};

use crate::netns::Netns;

/// Snapshot of a network device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    /// Device name.
    pub name: String,
    /// Hardware address, if the device has one.
    pub mac: Option<MacAddr>,
    /// Current MTU.
    pub mtu: u32,
    /// Whether the device is administratively up.
    pub up: bool,
}

/// Result of an offload adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffloadOutcome {
    /// Transmit checksum offload was switched off.
    Disabled,
    /// The offload tool is not installed; nothing was changed.
    Skipped,
}

/// Narrow interface over kernel device, namespace and route state.
#[async_trait]
pub trait NetworkControl: Send + Sync {
    /// Whether a device called `name` exists in `ns`.
    async fn link_exists(&self, ns: Netns, name: &str) -> WeaveResult<bool>;

    /// Read a device's attributes.
    async fn link_info(&self, ns: Netns, name: &str) -> WeaveResult<LinkInfo>;

    /// Names of all devices in `ns`.
    async fn list_links(&self, ns: Netns) -> WeaveResult<Vec<String>>;

    /// Create a bridge device in the host namespace.
    async fn add_bridge(&self, name: &str) -> WeaveResult<()>;

    /// Create a dummy device with the given MTU in the host namespace.
    async fn add_dummy(&self, name: &str, mtu: u32) -> WeaveResult<()>;

    /// Create a veth pair with both ends at `mtu` in the host namespace.
    async fn add_veth(&self, host: &str, peer: &str, mtu: u32) -> WeaveResult<()>;

    /// Delete a device. Deleting one end of a veth pair removes both.
    async fn delete_link(&self, ns: Netns, name: &str) -> WeaveResult<()>;

    /// Set a host device's hardware address.
    async fn set_address(&self, name: &str, mac: MacAddr) -> WeaveResult<()>;

    /// Enslave a host device to a bridge.
    async fn set_master(&self, name: &str, master: &str) -> WeaveResult<()>;

    /// Bring a device administratively up.
    async fn set_up(&self, ns: Netns, name: &str) -> WeaveResult<()>;

    /// Move a host device into the network namespace of `pid`.
    async fn move_to_netns(&self, name: &str, pid: u32) -> WeaveResult<()>;

    /// Rename a device inside `ns`.
    async fn rename(&self, ns: Netns, from: &str, to: &str) -> WeaveResult<()>;

    /// Switch off transmit checksum offload on a device.
    async fn disable_offload(&self, ns: Netns, name: &str) -> WeaveResult<OffloadOutcome>;

    /// Install or replace a device route for `cidr` via `dev`.
    async fn replace_route(&self, ns: Netns, cidr: &str, dev: &str) -> WeaveResult<()>;
}

/// [`NetworkControl`] backed by iproute2 and ethtool.
#[derive(Debug, Clone)]
pub struct IpNetworkControl {
    offload_available: bool,
}

impl IpNetworkControl {
    /// Create a controller. `offload_available` records whether `ethtool`
    /// was found; without it offload adjustments are skipped.
    #[must_use]
    pub const fn new(offload_available: bool) -> Self {
        Self { offload_available }
    }

    async fn ip(ns: Netns, args: &[&str]) -> Result<String, String> {
        let mut cmd = ns.command("ip");
        cmd.args(args);
        run(cmd, &format!("ip {}", args.join(" "))).await
    }

    async fn create(resource: String, args: &[&str]) -> WeaveResult<()> {
        Self::ip(Netns::Host, args)
            .await
            .map(drop)
            .map_err(|message| WeaveError::creation(resource, message))
    }

    async fn control(ns: Netns, args: &[&str]) -> WeaveResult<String> {
        Self::ip(ns, args)
            .await
            .map_err(|message| WeaveError::NetworkControl { message })
    }
}

#[async_trait]
impl NetworkControl for IpNetworkControl {
    async fn link_exists(&self, ns: Netns, name: &str) -> WeaveResult<bool> {
        let output = ns
            .command("ip")
            .args(["link", "show", "dev", name])
            .output()
            .await
            .map_err(|e| WeaveError::NetworkControl {
                message: format!("Failed to execute ip link show: {e}"),
            })?;
        Ok(output.status.success())
    }

    async fn link_info(&self, ns: Netns, name: &str) -> WeaveResult<LinkInfo> {
        let stdout = Self::control(ns, &["-o", "link", "show", "dev", name]).await?;
        stdout
            .lines()
            .find_map(parse_link_line)
            .ok_or_else(|| WeaveError::NetworkControl {
                message: format!("Unexpected output from ip link show dev {name}: {stdout:?}"),
            })
    }

    async fn list_links(&self, ns: Netns) -> WeaveResult<Vec<String>> {
        let stdout = Self::control(ns, &["-o", "link", "show"]).await?;
        Ok(stdout
            .lines()
            .filter_map(parse_link_line)
            .map(|link| link.name)
            .collect())
    }

    async fn add_bridge(&self, name: &str) -> WeaveResult<()> {
        tracing::debug!(name, "Creating bridge");
        Self::create(
            format!("bridge {name}"),
            &["link", "add", "name", name, "type", "bridge"],
        )
        .await
    }

    async fn add_dummy(&self, name: &str, mtu: u32) -> WeaveResult<()> {
        tracing::debug!(name, mtu, "Creating dummy interface");
        let mtu = mtu.to_string();
        Self::create(
            format!("dummy interface {name}"),
            &["link", "add", "name", name, "mtu", &mtu, "type", "dummy"],
        )
        .await
    }

    async fn add_veth(&self, host: &str, peer: &str, mtu: u32) -> WeaveResult<()> {
        tracing::debug!(host, peer, mtu, "Creating veth pair");
        let mtu = mtu.to_string();
        Self::create(
            format!("veth pair {host}/{peer}"),
            &[
                "link", "add", "name", host, "mtu", &mtu, "type", "veth", "peer", "name", peer,
                "mtu", &mtu,
            ],
        )
        .await
    }

    async fn delete_link(&self, ns: Netns, name: &str) -> WeaveResult<()> {
        tracing::debug!(%ns, name, "Deleting interface");
        Self::control(ns, &["link", "del", "dev", name]).await.map(drop)
    }

    async fn set_address(&self, name: &str, mac: MacAddr) -> WeaveResult<()> {
        let mac = mac.to_string();
        Self::control(Netns::Host, &["link", "set", "dev", name, "address", &mac])
            .await
            .map(drop)
    }

    async fn set_master(&self, name: &str, master: &str) -> WeaveResult<()> {
        tracing::debug!(bridge = master, interface = name, "Adding interface to bridge");
        Self::control(Netns::Host, &["link", "set", "dev", name, "master", master])
            .await
            .map(drop)
    }

    async fn set_up(&self, ns: Netns, name: &str) -> WeaveResult<()> {
        Self::control(ns, &["link", "set", "dev", name, "up"])
            .await
            .map(drop)
    }

    async fn move_to_netns(&self, name: &str, pid: u32) -> WeaveResult<()> {
        tracing::debug!(interface = name, pid, "Moving to netns");
        let pid = pid.to_string();
        Self::control(Netns::Host, &["link", "set", "dev", name, "netns", &pid])
            .await
            .map(drop)
    }

    async fn rename(&self, ns: Netns, from: &str, to: &str) -> WeaveResult<()> {
        Self::control(ns, &["link", "set", "dev", from, "name", to])
            .await
            .map(drop)
    }

    async fn disable_offload(&self, ns: Netns, name: &str) -> WeaveResult<OffloadOutcome> {
        if !self.offload_available {
            tracing::warn!(%ns, interface = name, "ethtool not found, leaving offload enabled");
            return Ok(OffloadOutcome::Skipped);
        }

        let mut cmd = ns.command("ethtool");
        cmd.args(["-K", name, "tx", "off"]);
        run(cmd, &format!("ethtool -K {name} tx off"))
            .await
            .map_err(|message| WeaveError::NetworkControl { message })?;

        tracing::debug!(%ns, interface = name, "Transmit offload disabled");
        Ok(OffloadOutcome::Disabled)
    }

    async fn replace_route(&self, ns: Netns, cidr: &str, dev: &str) -> WeaveResult<()> {
        Self::control(ns, &["route", "replace", cidr, "dev", dev])
            .await
            .map(drop)
    }
}

/// Run a command, returning its stdout or a message built from stderr.
async fn run(mut cmd: Command, what: &str) -> Result<String, String> {
    let output = cmd
        .output()
        .await
        .map_err(|e| format!("Failed to execute {what}: {e}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("{what} failed ({}): {}", output.status, stderr.trim()));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse one line of `ip -o link show`.
///
/// Format: `5: vethwepl42@if4: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 65535 ... link/ether 7a:.. brd ..`
fn parse_link_line(line: &str) -> Option<LinkInfo> {
    let mut tokens = line.split_whitespace();
    tokens.next()?.strip_suffix(':')?;
    let name = tokens.next()?.trim_end_matches(':');
    let name = name.split('@').next().unwrap_or(name).to_string();
    let flags = tokens.next()?;
    let up = flags
        .trim_start_matches('<')
        .trim_end_matches('>')
        .split(',')
        .any(|flag| flag == "UP");

    let rest: Vec<&str> = tokens.collect();
    let value_after = |key: &str| {
        rest.iter()
            .position(|t| *t == key)
            .and_then(|i| rest.get(i + 1))
            .copied()
    };
    let mtu = value_after("mtu")?.parse().ok()?;
    let mac = value_after("link/ether").and_then(|m| m.parse().ok());

    Some(LinkInfo { name, mac, mtu, up })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bridge_line() {
        let line = "5: weave: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 65535 qdisc noqueue state UP \
                    mode DEFAULT group default qlen 1000\\    link/ether 7a:0e:21:9c:5f:01 brd ff:ff:ff:ff:ff:ff";
        let info = parse_link_line(line).unwrap();
        assert_eq!(info.name, "weave");
        assert_eq!(info.mtu, 65535);
        assert!(info.up);
        assert_eq!(info.mac.unwrap().to_string(), "7a:0e:21:9c:5f:01");
    }

    #[test]
    fn parses_veth_with_peer_suffix() {
        let line = "9: vethwepl4321@if8: <BROADCAST,MULTICAST> mtu 1500 qdisc noop state DOWN \
                    mode DEFAULT group default qlen 1000\\    link/ether 02:11:22:33:44:55 brd ff:ff:ff:ff:ff:ff";
        let info = parse_link_line(line).unwrap();
        assert_eq!(info.name, "vethwepl4321");
        assert_eq!(info.mtu, 1500);
        assert!(!info.up);
    }

    #[test]
    fn lower_up_alone_is_not_admin_up() {
        let line = "3: eth0: <BROADCAST,LOWER_UP> mtu 1500 qdisc noop state DOWN";
        assert!(!parse_link_line(line).unwrap().up);
    }

    #[test]
    fn loopback_has_no_ether_address() {
        let line = "1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536 qdisc noqueue state UNKNOWN \
                    mode DEFAULT group default qlen 1000\\    link/loopback 00:00:00:00:00:00 brd 00:00:00:00:00:00";
        let info = parse_link_line(line).unwrap();
        assert_eq!(info.name, "lo");
        assert_eq!(info.mac, None);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_link_line("").is_none());
        assert!(parse_link_line("Device \"weave\" does not exist.").is_none());
    }

    #[tokio::test]
    async fn offload_skipped_without_ethtool() {
        let net = IpNetworkControl::new(false);
        let outcome = net.disable_offload(Netns::Host, "weave").await.unwrap();
        assert_eq!(outcome, OffloadOutcome::Skipped);
    }
}
