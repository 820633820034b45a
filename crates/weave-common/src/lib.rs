//! # weave-common
//!
//! Shared types for the weave control path.
//!
//! This crate provides functionality used by every weave crate:
//! - The error taxonomy
//! - Configuration defaults
//! - Hardware address generation

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod mac;

pub use config::WeaveConfig;
pub use error::{WeaveError, WeaveResult};
pub use mac::MacAddr;
