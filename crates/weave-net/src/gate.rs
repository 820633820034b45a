//! Privilege and tool prechecks.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::PathBuf;

use weave_common::{WeaveError, WeaveResult};

/// The optional offload tool; its absence only degrades behaviour.
pub const OFFLOAD_TOOL: &str = "ethtool";

/// Optional tools found by [`ToolGate::check`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    available: BTreeSet<String>,
}

impl Capabilities {
    /// Whether an optional tool was found.
    #[must_use]
    pub fn has(&self, tool: &str) -> bool {
        self.available.contains(tool)
    }

    /// Whether offload can be adjusted.
    #[must_use]
    pub fn offload(&self) -> bool {
        self.has(OFFLOAD_TOOL)
    }
}

/// Looks up external tools on a search path.
#[derive(Debug, Clone)]
pub struct ToolGate {
    path: OsString,
}

impl ToolGate {
    /// Use the process `PATH`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::with_path(std::env::var_os("PATH").unwrap_or_default())
    }

    /// Use an explicit search path.
    pub fn with_path(path: impl Into<OsString>) -> Self {
        Self { path: path.into() }
    }

    /// Resolve a tool to an executable file on the search path.
    #[must_use]
    pub fn find(&self, tool: &str) -> Option<PathBuf> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        which::which_in(tool, Some(&self.path), cwd).ok()
    }

    /// Fail on the first missing required tool; warn about missing optional ones.
    ///
    /// # Errors
    ///
    /// Returns [`WeaveError::ToolMissing`] naming the first absent required tool.
    pub fn check(&self, required: &[&str], optional: &[&str]) -> WeaveResult<Capabilities> {
        if let Some(tool) = required.iter().find(|tool| self.find(tool).is_none()) {
            return Err(WeaveError::ToolMissing {
                tool: (*tool).to_string(),
            });
        }

        let mut caps = Capabilities::default();
        for tool in optional {
            if self.find(tool).is_some() {
                caps.available.insert((*tool).to_string());
            } else {
                tracing::warn!(tool, "Optional tool not found, continuing without it");
            }
        }
        Ok(caps)
    }
}

/// Verify the process may reconfigure host networking.
///
/// Root passes outright; otherwise both `CAP_NET_ADMIN` and `CAP_SYS_ADMIN`
/// must be effective.
///
/// # Errors
///
/// Returns [`WeaveError::PermissionDenied`] naming `operation`.
pub fn check_privileges(operation: &str) -> WeaveResult<()> {
    if rustix::process::geteuid().is_root() {
        return Ok(());
    }

    let effective = |cap| caps::has_cap(None, caps::CapSet::Effective, cap).unwrap_or(false);
    if effective(caps::Capability::CAP_NET_ADMIN) && effective(caps::Capability::CAP_SYS_ADMIN) {
        tracing::debug!(operation, "Running unprivileged with network capabilities");
        return Ok(());
    }

    Err(WeaveError::PermissionDenied {
        operation: operation.to_string(),
    })
}
