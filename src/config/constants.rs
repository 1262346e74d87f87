//! Configuration constants.
//!
//! This module defines the operational parameters of the access layer:
//! retry budget, backoff, health-check cadence, pool defaults, and the
//! environment variable names the connection config is read from.

use std::time::Duration;

// Retry strategy
/// Maximum number of retries after the first attempt.
/// Total attempts per query are bounded by `MAX_RETRIES + 1`.
pub const MAX_RETRIES: usize = 3;
/// Delay before the first retry in milliseconds.
/// Subsequent delays double: 100ms, 200ms, 400ms.
pub const RETRY_BASE_DELAY_MS: u64 = 100;
/// Factor by which the retry delay grows on each attempt.
pub const RETRY_FACTOR: u64 = 2;

// Health monitoring
/// Interval between two liveness probes.
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
/// Consecutive probe failures that trigger a pool reset.
pub const RESET_THRESHOLD: u32 = 3;
/// Trivial statement used to test connectivity.
pub const LIVENESS_QUERY: &str = "SELECT 1";
/// Capacity of the health event broadcast channel.
/// Slow subscribers lose the oldest events, the monitor never waits on them.
pub const HEALTH_EVENT_CAPACITY: usize = 64;

// Query logging
/// Executions slower than this are logged as slow queries.
pub const SLOW_QUERY_THRESHOLD: Duration = Duration::from_millis(1000);
/// Maximum SQL preview length in characters when logging a statement.
pub const SQL_LOG_PREVIEW_CHARS: usize = 100;

// Lifecycle
/// How long `shutdown()` waits for in-flight queries before tearing the pool down.
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);
/// Polling step while waiting for in-flight queries to drain.
pub const SHUTDOWN_DRAIN_POLL: Duration = Duration::from_millis(50);

// Pool defaults (used when the corresponding variable is unset)
pub const DEFAULT_MAX_CONNECTIONS: u32 = 20;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_STATEMENT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_APPLICATION_NAME: &str = "pg_resilience";

// Environment variables
/// Presence of this variable marks the internal (private network) deployment.
pub const ENV_DEPLOYMENT_FLAG: &str = "RAILWAY_ENVIRONMENT";
/// Endpoint used on the internal network path.
pub const ENV_INTERNAL_URL: &str = "DATABASE_URL";
/// Endpoint used on the public network path.
pub const ENV_PUBLIC_URL: &str = "DATABASE_PUBLIC_URL";
pub const ENV_POOL_MAX: &str = "DB_POOL_MAX";
pub const ENV_IDLE_TIMEOUT_MS: &str = "DB_IDLE_TIMEOUT_MS";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "DB_CONNECT_TIMEOUT_MS";
pub const ENV_STATEMENT_TIMEOUT_MS: &str = "DB_STATEMENT_TIMEOUT_MS";
pub const ENV_APPLICATION_NAME: &str = "DB_APPLICATION_NAME";
