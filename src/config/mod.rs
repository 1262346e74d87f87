//! Application configuration and constants.
//!
//! This module provides:
//! - Operational constants (retry budget, probe cadence, pool defaults)
//! - Connection configuration read from the environment
//! - CLI option types and parsing

mod connection;
mod constants;
mod types;

// Re-export all constants
pub use connection::{ConnectionConfig, DeploymentContext, TlsMode};
pub use constants::*;
pub use types::{LogFormat, LogLevel, Opt};
