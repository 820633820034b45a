//! [`ContainerRuntime`] backed by the docker CLI.

use std::collections::BTreeMap;
use std::process::Stdio;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use weave_common::{WeaveError, WeaveResult};

use super::{ContainerInfo, ContainerRuntime, EventStream, ImageInfo, LifecycleEvent, RunSpec};

/// Drives docker through its command line client.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerCli {
    /// Use `docker` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Use a specific client binary.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn docker(&self, args: &[&str]) -> WeaveResult<std::process::Output> {
        Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| WeaveError::RuntimeCommand {
                message: format!("Failed to execute {} {}: {e}", self.binary, args.join(" ")),
            })
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn inspect(&self, name: &str) -> WeaveResult<Option<ContainerInfo>> {
        let output = self.docker(&["container", "inspect", name]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_not_found(&stderr) {
                return Ok(None);
            }
            return Err(WeaveError::RuntimeCommand {
                message: format!("docker inspect {name} failed: {}", stderr.trim()),
            });
        }
        parse_inspect(&String::from_utf8_lossy(&output.stdout))
    }

    async fn remove(&self, name: &str) -> WeaveResult<()> {
        tracing::debug!(name, "Removing container");
        let output = self.docker(&["rm", name]).await?;
        if !output.status.success() {
            return Err(WeaveError::RuntimeCommand {
                message: format!(
                    "docker rm {name} failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }

    async fn run(&self, spec: &RunSpec) -> WeaveResult<String> {
        let args = spec.docker_args();
        tracing::debug!(name = %spec.name, image = %spec.image, ?args, "Starting container");

        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.docker(&args).await?;
        if !output.status.success() {
            return Err(WeaveError::RuntimeCommand {
                message: format!(
                    "docker run {} failed: {}",
                    spec.image,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(WeaveError::RuntimeCommand {
                message: format!("docker run {} printed no container id", spec.image),
            });
        }
        Ok(id)
    }

    async fn image(&self, reference: &str) -> WeaveResult<Option<ImageInfo>> {
        let output = self.docker(&["image", "inspect", reference]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_not_found(&stderr) {
                return Ok(None);
            }
            return Err(WeaveError::RuntimeCommand {
                message: format!("docker image inspect {reference} failed: {}", stderr.trim()),
            });
        }
        parse_image(&String::from_utf8_lossy(&output.stdout))
    }

    async fn events(&self) -> WeaveResult<EventStream> {
        let mut child = Command::new(&self.binary)
            .args(["events", "--filter", "type=container", "--format", "{{json .}}"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WeaveError::RuntimeCommand {
                message: format!("Failed to execute {} events: {e}", self.binary),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| WeaveError::RuntimeCommand {
            message: "docker events has no stdout".to_string(),
        })?;
        let lines = BufReader::new(stdout).lines();

        // The child rides along in the stream state so it lives exactly as
        // long as the subscription.
        let events = stream::unfold(Some((lines, child)), |state| async move {
            let (mut lines, child) = state?;
            match lines.next_line().await {
                Ok(Some(line)) => Some((LifecycleEvent::from_json(&line), Some((lines, child)))),
                Ok(None) => None,
                Err(e) => Some((Err(WeaveError::Io(e)), None)),
            }
        })
        .filter_map(|decoded| futures::future::ready(decoded.transpose()));

        Ok(events.boxed())
    }
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("No such")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawContainer {
    id: String,
    #[serde(default)]
    name: String,
    state: RawState,
    config: RawConfig,
    #[serde(default)]
    network_settings: Option<RawNetworkSettings>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawState {
    running: bool,
    #[serde(default)]
    pid: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawConfig {
    image: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawNetworkSettings {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
    #[serde(default)]
    networks: Option<BTreeMap<String, RawEndpoint>>,
}

#[derive(Debug, Deserialize)]
struct RawEndpoint {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

impl RawNetworkSettings {
    /// The legacy top-level address, else the first per-network one.
    fn address(self) -> Option<String> {
        if !self.ip_address.is_empty() {
            return Some(self.ip_address);
        }
        self.networks?
            .into_values()
            .map(|endpoint| endpoint.ip_address)
            .find(|ip| !ip.is_empty())
    }
}

fn parse_inspect(stdout: &str) -> WeaveResult<Option<ContainerInfo>> {
    let raw: Vec<RawContainer> = serde_json::from_str(stdout)?;
    Ok(raw.into_iter().next().map(|c| ContainerInfo {
        id: c.id,
        name: c.name.trim_start_matches('/').to_string(),
        image: c.config.image,
        running: c.state.running,
        pid: u32::try_from(c.state.pid).unwrap_or(0),
        ip_address: c.network_settings.and_then(RawNetworkSettings::address),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawImage {
    id: String,
    #[serde(default)]
    created: String,
    #[serde(default)]
    repo_tags: Option<Vec<String>>,
}

fn parse_image(stdout: &str) -> WeaveResult<Option<ImageInfo>> {
    let raw: Vec<RawImage> = serde_json::from_str(stdout)?;
    Ok(raw.into_iter().next().map(|i| ImageInfo {
        id: i.id,
        created: i.created,
        tags: i.repo_tags.unwrap_or_default(),
    }))
}
