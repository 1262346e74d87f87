//! Configuration types and CLI options.
//!
//! This module defines enums and structs used for command-line argument parsing
//! of the binary. The database connection itself is configured from the
//! environment, see [`crate::config::ConnectionConfig`].

use std::net::IpAddr;

use clap::{Parser, ValueEnum};

/// Logging level for the application.
///
/// Controls the verbosity of log output, from most restrictive (Error) to most
/// verbose (Trace).
#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    /// Only error messages
    Error,
    /// Error and warning messages
    Warn,
    /// Error, warning, and informational messages
    Info,
    /// All messages except trace
    Debug,
    /// All messages including trace
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Log output format.
///
/// - `Plain`: Human-readable format with colors (default)
/// - `Json`: Structured JSON format for machine parsing
#[derive(Clone, Debug, ValueEnum)]
pub enum LogFormat {
    /// Human-readable format with colors (default)
    Plain,
    /// Structured JSON format for machine parsing
    Json,
}

/// Command-line options of the `pg_resilience` binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "pg_resilience",
    version,
    about = "Runs the resilient PostgreSQL access layer with health monitoring"
)]
pub struct Opt {
    /// Log level
    #[arg(long, value_enum, default_value = "info", env = "PG_RESILIENCE_LOG_LEVEL")]
    pub log_level: LogLevel,

    /// Log format
    #[arg(long, value_enum, default_value = "plain", env = "PG_RESILIENCE_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Port for the HTTP status server (/health, /health/details, /metrics).
    /// Disabled when not set.
    #[arg(long, env = "PG_RESILIENCE_STATUS_PORT")]
    pub status_port: Option<u16>,

    /// Address the status server binds to
    #[arg(long, default_value = "127.0.0.1", env = "PG_RESILIENCE_STATUS_HOST")]
    pub status_host: IpAddr,

    /// Seconds between two liveness probes
    #[arg(long, default_value_t = 30, env = "PG_RESILIENCE_HEALTH_INTERVAL_SECS")]
    pub health_interval_secs: u64,
}
