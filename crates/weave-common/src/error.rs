//! Common error types for the weave control path.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`WeaveError`].
pub type WeaveResult<T> = Result<T, WeaveError>;

/// Errors raised by the weave control path.
///
/// Missing optional tools are not represented here: they are logged as
/// warnings and the operation carries on without that capability.
#[derive(Error, Diagnostic, Debug)]
pub enum WeaveError {
    /// The process lacks the privilege to manipulate host networking.
    #[error("Insufficient privilege: {operation} requires root")]
    #[diagnostic(
        code(weave::precheck::privilege),
        help("Run weave as root, or grant it CAP_NET_ADMIN and CAP_SYS_ADMIN")
    )]
    PermissionDenied {
        /// The operation that was attempted.
        operation: String,
    },

    /// A required external tool is not installed.
    #[error("Required tool not found: {tool}")]
    #[diagnostic(
        code(weave::precheck::tool),
        help("Install {tool} and make sure it is on PATH")
    )]
    ToolMissing {
        /// Name of the missing executable.
        tool: String,
    },

    /// The router container name is already taken.
    #[error("{message}")]
    #[diagnostic(code(weave::router::conflict))]
    StateConflict {
        /// Operator-facing description of the conflict.
        message: String,
    },

    /// A kernel object (device, veth pair, rule) could not be created.
    #[error("Failed to create {resource}: {message}")]
    #[diagnostic(
        code(weave::resource),
        help("No retry is attempted; re-run the command once the cause is fixed")
    )]
    ResourceCreation {
        /// The resource being created, e.g. `bridge weave`.
        resource: String,
        /// The underlying failure.
        message: String,
    },

    /// The runtime reports the container exists but it is not running.
    #[error("Container {name} is not running (reported pid 0)")]
    #[diagnostic(code(weave::runtime::not_running))]
    ContainerNotRunning {
        /// Container name or id.
        name: String,
    },

    /// The runtime has no record of the container.
    #[error("Container {name} is unknown to the container runtime")]
    #[diagnostic(code(weave::runtime::unknown))]
    ContainerUnknown {
        /// Container name or id.
        name: String,
    },

    /// A container runtime command failed.
    #[error("Container runtime error: {message}")]
    #[diagnostic(code(weave::runtime::command))]
    RuntimeCommand {
        /// The error message.
        message: String,
    },

    /// A kernel network control command failed outside of creation.
    #[error("Network control error: {message}")]
    #[diagnostic(code(weave::netctl))]
    NetworkControl {
        /// The error message.
        message: String,
    },

    /// The router status endpoint could not be queried.
    #[error("Failed to fetch router status: {message}")]
    #[diagnostic(
        code(weave::status),
        help("Is the weave router running? Try `weave launch`")
    )]
    Status {
        /// The error message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(weave::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(weave::serialization))]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(weave::config))]
    Config {
        /// The error message.
        message: String,
    },
}

impl WeaveError {
    /// Shorthand for a [`WeaveError::ResourceCreation`].
    pub fn creation(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ResourceCreation {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Whether this error stems from a failed precondition (privilege or tooling).
    #[must_use]
    pub const fn is_precheck(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. } | Self::ToolMissing { .. })
    }
}

impl From<serde_json::Error> for WeaveError {
    fn from(err: serde_json::Error) -> Self {
        WeaveError::Serialization(err.to_string())
    }
}
