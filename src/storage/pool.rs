//! Connection pool abstraction.
//!
//! A [`PoolHandle`] owns a bounded set of physical connections to one
//! endpoint. Acquire and release stay inside the handle: callers hand it a
//! statement and get rows back, waiting at most the configured connect
//! timeout for a free connection. A [`PoolConnector`] builds handles from
//! the immutable [`ConnectionConfig`]; it is used at startup and by pool resets.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::ConnectionConfig;
use crate::error_handling::DbError;
use crate::storage::values::{QueryResult, SqlValue};

/// Point-in-time connection counts of one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolOccupancy {
    /// Open connections, idle or in use.
    pub total: u32,
    pub idle: u32,
    pub active: u32,
    /// Tasks currently waiting for a free connection.
    pub waiting: u32,
    pub max: u32,
}

impl PoolOccupancy {
    /// Builds a consistent snapshot from raw counters.
    ///
    /// The counters are read independently and may race; the result is
    /// clamped so that `idle + active <= max` always holds.
    pub fn from_counts(total: u32, idle: u32, waiting: u32, max: u32) -> Self {
        let total = total.min(max);
        let idle = idle.min(total);
        PoolOccupancy {
            total,
            idle,
            active: total - idle,
            waiting,
            max,
        }
    }
}

/// A live, owned set of connections to one endpoint.
#[async_trait]
pub trait PoolHandle: Send + Sync {
    /// Runs one statement on a pooled connection.
    ///
    /// Errors are already classified: implementations convert driver errors
    /// with [`crate::error_handling::classify_sqlx_error`] right where they occur.
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, DbError>;

    fn occupancy(&self) -> PoolOccupancy;

    /// Closes every connection. Best effort: close errors are logged, never returned.
    async fn teardown(&self);

    fn is_closed(&self) -> bool;
}

/// Builds pool handles from a connection config.
#[async_trait]
pub trait PoolConnector: Send + Sync {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn PoolHandle>, DbError>;
}

/// Creates the first pool handle for `config`.
///
/// # Errors
///
/// Returns a `Configuration` error when no endpoint is configured, otherwise
/// whatever the connector reports.
pub async fn initialize(
    config: &ConnectionConfig,
    connector: &dyn PoolConnector,
) -> Result<Arc<dyn PoolHandle>, DbError> {
    if config.url.trim().is_empty() {
        return Err(DbError::configuration(
            "no database URL configured (set DATABASE_URL or DATABASE_PUBLIC_URL)",
        ));
    }

    log::info!(
        "Initializing connection pool: {} network path, tls={:?}, max_connections={}",
        config.context,
        config.tls,
        config.max_connections
    );
    connector.connect(config).await
}
