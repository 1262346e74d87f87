//! Connection pool layer.
//!
//! - `pool`: the `PoolHandle` / `PoolConnector` seam and pool initialization
//! - `postgres`: the sqlx-backed implementation
//! - `reset`: the current-handle cell and its atomic replacement
//! - `values`: parameters and result rows

pub mod pool;
pub mod postgres;
pub mod reset;
pub mod values;

// Re-export commonly used items
pub use pool::{initialize, PoolConnector, PoolHandle, PoolOccupancy};
pub use postgres::{PgConnector, PgPoolHandle};
pub use reset::{PoolResetCoordinator, ResetOutcome};
pub use values::{QueryResult, Record, SqlValue};
