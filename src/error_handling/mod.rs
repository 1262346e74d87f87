//! Error handling and query statistics.
//!
//! This module provides:
//! - The closed error taxonomy (`ErrorKind`) and the `DbError` type
//! - Classification of raw driver errors, done once at the call boundary
//! - The retry backoff schedule
//! - Thread-safe failure and latency statistics

mod categorization;
mod stats;
mod types;

// Re-export public API
pub use categorization::{classify_sqlstate, classify_sqlx_error, get_retry_strategy};
pub use stats::QueryStats;
pub use types::{BoxError, DbError, ErrorKind, FailureRecord, InitializationError};
