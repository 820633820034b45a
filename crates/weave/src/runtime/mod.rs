//! Container runtime access.
//!
//! Weave never manages containers itself. It asks the container runtime
//! (docker) about the router container, starts it, and follows lifecycle
//! events. Everything goes through [`ContainerRuntime`] so the launcher
//! and the watcher can be driven by an in-memory runtime in tests.

mod docker;
pub mod events;
mod lifecycle;

pub use docker::DockerCli;
pub use events::{EventKind, LifecycleEvent};
pub use lifecycle::{ContainerRuntime, EventStream};

use serde::{Deserialize, Serialize};

/// What the runtime reports about one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Full container id.
    pub id: String,
    /// Container name without the leading slash.
    pub name: String,
    /// Image reference the container was created from.
    pub image: String,
    /// Whether the container's process is alive.
    pub running: bool,
    /// Host pid of the container's init process; 0 when not running.
    pub pid: u32,
    /// Address assigned by the runtime's own networking, if any.
    pub ip_address: Option<String>,
}

/// What the runtime reports about an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    /// Content-addressed image id.
    pub id: String,
    /// Creation timestamp as reported by the runtime.
    pub created: String,
    /// Tags pointing at this image.
    pub tags: Vec<String>,
}

/// A detached container to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Share the host network namespace.
    pub host_network: bool,
    /// Capabilities to add.
    pub cap_add: Vec<String>,
    /// Arguments passed to the image entrypoint.
    pub args: Vec<String>,
}

impl RunSpec {
    /// Arguments for `docker run`.
    #[must_use]
    pub fn docker_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            self.name.clone(),
        ];
        if self.host_network {
            args.push("--net=host".to_string());
        }
        for cap in &self.cap_add {
            args.push(format!("--cap-add={cap}"));
        }
        args.push(self.image.clone());
        args.extend(self.args.iter().cloned());
        args
    }
}
