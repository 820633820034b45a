//! # weave
//!
//! Host-side control path for the weave overlay router.
//!
//! `weave` prepares the host bridge, starts the router container and wires
//! it onto that bridge, and follows container starts to fix up networking
//! inside them.
//!
//! ## Usage
//!
//! ```no_run
//! use weave::router::Launcher;
//! use weave::runtime::DockerCli;
//! use weave_common::WeaveConfig;
//! use weave_net::{IpNetworkControl, Iptables};
//!
//! # async fn example() -> weave_common::WeaveResult<()> {
//! let config = WeaveConfig::default();
//! let net = IpNetworkControl::new(true);
//! let filter = Iptables::new();
//! let runtime = DockerCli::new();
//!
//! let launched = Launcher::new(&net, &filter, &runtime, &config)
//!     .launch(&["10.0.0.2".to_string()])
//!     .await?;
//! println!("{}", launched.container_id);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cli;
pub mod router;
pub mod runtime;
pub mod status;
pub mod watcher;

#[cfg(test)]
pub(crate) mod testing;

pub use router::{Launched, Launcher, RouterState};
pub use watcher::{WatchSummary, Watcher};
