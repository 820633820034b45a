//! CLI command definitions and handlers.

use clap::{Parser, Subcommand};
use ipnet::Ipv4Net;
use color_eyre::eyre::{Result, WrapErr};

use weave_common::WeaveConfig;
use weave_net::gate::OFFLOAD_TOOL;
use weave_net::{IpNetworkControl, Iptables, ToolGate, check_privileges, setup_fabric};

use crate::router::Launcher;
use crate::runtime::{ContainerRuntime, DockerCli};
use crate::status;
use crate::watcher::Watcher;

/// Weave - host networking for the weave overlay router
#[derive(Parser, Debug)]
#[command(name = "weave")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Bridge device name
    #[arg(long, global = true, env = "WEAVE_BRIDGE", default_value = WeaveConfig::DEFAULT_BRIDGE)]
    pub bridge: String,

    /// MTU for the bridge and container interfaces
    #[arg(long, global = true, env = "WEAVE_MTU", default_value_t = WeaveConfig::DEFAULT_MTU)]
    pub mtu: u32,

    /// Router image
    #[arg(long, global = true, env = "WEAVE_IMAGE", default_value = WeaveConfig::DEFAULT_IMAGE)]
    pub image: String,

    /// Port of the router's HTTP API
    #[arg(
        long,
        global = true,
        env = "WEAVE_HTTP_PORT",
        default_value_t = WeaveConfig::DEFAULT_HTTP_PORT
    )]
    pub http_port: u16,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Weave commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the weave bridge and its firewall rules
    Setup,

    /// Start the router container and attach it to the bridge
    Launch {
        /// Peer addresses and router flags, passed through to the router
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        peers: Vec<String>,
    },

    /// Watch container starts and fix up their networking
    Helper {
        /// Interface to adjust inside each container
        container_interface: String,

        /// Overlay range to route via that interface (IPv4 CIDR)
        route: Ipv4Net,
    },

    /// Show the router's status
    Status,

    /// Show the router image version
    Version,
}

const SETUP_TOOLS: &[&str] = &["ip", "iptables"];
const LAUNCH_TOOLS: &[&str] = &["ip", "iptables", "nsenter", "docker"];
const HELPER_TOOLS: &[&str] = &["ip", "nsenter", "docker"];
const VERSION_TOOLS: &[&str] = &["docker"];

impl Cli {
    /// Settings assembled from defaults and global options.
    #[must_use]
    pub fn config(&self) -> WeaveConfig {
        WeaveConfig::default()
            .with_bridge(self.bridge.clone())
            .with_mtu(self.mtu)
            .with_image(self.image.clone())
            .with_http_port(self.http_port)
    }

    /// Run the selected command.
    pub async fn execute(self) -> Result<()> {
        let config = self.config();
        let gate = ToolGate::from_env();

        match self.command {
            Commands::Setup => {
                check_privileges("setup")?;
                let caps = gate.check(SETUP_TOOLS, &[OFFLOAD_TOOL])?;
                let net = IpNetworkControl::new(caps.offload());
                let filter = Iptables::new();

                let bridge = setup_fabric(&net, &filter, &config)
                    .await
                    .wrap_err("Failed to set up the weave bridge")?;
                tracing::info!(
                    bridge = %bridge.name,
                    mac = %bridge.mac,
                    mtu = bridge.mtu,
                    created = bridge.created,
                    "Bridge ready"
                );
                Ok(())
            }

            Commands::Launch { peers } => {
                check_privileges("launch")?;
                let caps = gate.check(LAUNCH_TOOLS, &[OFFLOAD_TOOL])?;
                let net = IpNetworkControl::new(caps.offload());
                let filter = Iptables::new();
                let runtime = DockerCli::new();

                let launched = Launcher::new(&net, &filter, &runtime, &config)
                    .launch(&peers)
                    .await?;
                println!("{}", launched.container_id);
                Ok(())
            }

            Commands::Helper {
                container_interface,
                route,
            } => {
                check_privileges("helper")?;
                let caps = gate.check(HELPER_TOOLS, &[OFFLOAD_TOOL])?;
                let net = IpNetworkControl::new(caps.offload());
                let runtime = DockerCli::new();

                let events = runtime.events().await?;
                let summary = Watcher::new(&net, &runtime, container_interface, route)
                    .run(events, shutdown_signal())
                    .await;
                tracing::info!(
                    seen = summary.seen,
                    actioned = summary.actioned,
                    skipped = summary.skipped,
                    failed = summary.failed,
                    "Helper stopped"
                );
                Ok(())
            }

            Commands::Status => {
                let body = status::fetch_status(&config.status_url()).await?;
                print!("{body}");
                Ok(())
            }

            Commands::Version => {
                gate.check(VERSION_TOOLS, &[])?;
                let runtime = DockerCli::new();

                let image = status::router_image(&runtime, &config.image).await?;
                println!("weave router {}", config.image);
                println!("{}", image.id);
                println!("{}", image.created);
                Ok(())
            }
        }
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Cannot listen for SIGTERM, stopping on SIGINT only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}
