//! pg_resilience library: a resilient PostgreSQL access layer
//!
//! One shared connection pool, bounded retry with exponential backoff for
//! transient failures, and a background health monitor that rebuilds the pool
//! after sustained probe failures.
//!
//! # Example
//!
//! ```no_run
//! use pg_resilience::{ConnectionConfig, Database, SqlValue, HEALTH_CHECK_INTERVAL};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::connect(ConnectionConfig::from_env()?).await?;
//! db.start_health_monitor(HEALTH_CHECK_INTERVAL);
//!
//! let result = db
//!     .execute("SELECT id, email FROM users WHERE id = $1", &[SqlValue::Int(42)])
//!     .await?;
//! println!("{} row(s)", result.row_count);
//!
//! db.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Requirements
//!
//! This library requires a Tokio runtime with the time driver enabled.

mod app;
pub mod config;
mod error_handling;
pub mod executor;
pub mod health;
pub mod initialization;
mod service;
pub mod status;
pub mod status_server;
pub mod storage;

// Re-export public API
pub use config::{
    ConnectionConfig, DeploymentContext, LogFormat, LogLevel, Opt, TlsMode,
    HEALTH_CHECK_INTERVAL, MAX_RETRIES, RESET_THRESHOLD,
};
pub use error_handling::{
    classify_sqlstate, classify_sqlx_error, DbError, ErrorKind, FailureRecord,
    InitializationError, QueryStats,
};
pub use executor::{QueryExecutor, QueryRequest};
pub use health::{HealthEvent, HealthMonitor, HealthState, HealthStatus};
pub use service::Database;
pub use status::{DatabaseDetails, HealthSnapshot, ProbeStatus, StatusReporter, TableStats};
pub use storage::{
    PoolConnector, PoolHandle, PoolOccupancy, PoolResetCoordinator, QueryResult, Record,
    ResetOutcome, SqlValue,
};
