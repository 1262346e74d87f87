//! Query execution with bounded retry.
//!
//! Every attempt runs against whatever pool handle is current at that moment,
//! so a retry issued after a concurrent reset lands on the fresh pool. Backoff
//! between attempts is a tokio sleep driven by `tokio_retry`.

mod redact;
mod request;

pub use redact::{redact_sql, sql_preview};
pub use request::{is_read_only, QueryRequest};

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use tokio::time::Instant;
use tokio_retry::RetryIf;

use crate::config::{MAX_RETRIES, SLOW_QUERY_THRESHOLD};
use crate::error_handling::{get_retry_strategy, DbError, FailureRecord, QueryStats};
use crate::storage::{PoolResetCoordinator, QueryResult, SqlValue};

/// Compiles a constant regex pattern, panicking with context if it is malformed.
fn compile_regex_unsafe(pattern: &str, context: &str) -> regex::Regex {
    regex::Regex::new(pattern).unwrap_or_else(|e| {
        panic!(
            "Failed to compile regex pattern '{}' in {}: {}. This is a programming error.",
            pattern, context, e
        )
    })
}

/// Runs statements against the current pool handle, retrying transient failures.
#[derive(Clone)]
pub struct QueryExecutor {
    coordinator: Arc<PoolResetCoordinator>,
    stats: Arc<QueryStats>,
}

impl QueryExecutor {
    pub fn new(coordinator: Arc<PoolResetCoordinator>, stats: Arc<QueryStats>) -> Self {
        QueryExecutor { coordinator, stats }
    }

    /// Runs `sql` with idempotency inferred from the statement text.
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, DbError> {
        self.execute_request(&QueryRequest::new(sql, params.to_vec()))
            .await
    }

    /// Runs one request.
    ///
    /// A failure is retried (at most `MAX_RETRIES` times, backing off 100, 200
    /// and 400 ms) only when its kind is retryable and the request is
    /// idempotent or provably never reached the server. Any other failure is
    /// returned after the attempt that produced it.
    ///
    /// # Errors
    ///
    /// Returns the last attempt's error, with [`DbError::attempts`] set to the
    /// number of attempts made.
    pub async fn execute_request(&self, request: &QueryRequest) -> Result<QueryResult, DbError> {
        self.stats.record_execution();
        let started = Instant::now();

        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let coordinator = &*self.coordinator;
        let stats = &*self.stats;
        let sql = request.sql.as_str();
        let params = request.params.as_slice();
        let idempotent = request.is_idempotent();

        let action = move || async move {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let handle = coordinator.current().await;
            handle.query(sql, params).await.map_err(|e| {
                stats.record_failure(&FailureRecord::new(e.kind(), attempt));
                e.with_attempts(attempt)
            })
        };

        let condition = move |e: &DbError| {
            let attempt = attempts.load(Ordering::SeqCst);
            let remaining = (MAX_RETRIES as u32 + 1).saturating_sub(attempt);

            if !e.is_retryable() {
                debug!("Attempt {} failed with non-retryable error: {}", attempt, e);
                return false;
            }
            if !idempotent && e.was_dispatched() {
                warn!(
                    "Attempt {} failed ({}), not retrying a non-idempotent statement: {}",
                    attempt,
                    e.kind(),
                    sql_preview(sql)
                );
                return false;
            }
            if remaining == 0 {
                warn!(
                    "Attempt {} failed ({}), retries exhausted: {}",
                    attempt,
                    e.kind(),
                    e.message()
                );
                return false;
            }

            warn!(
                "Attempt {} failed ({}), {} retries remaining: {}",
                attempt,
                e.kind(),
                remaining,
                e.message()
            );
            stats.record_retry();
            true
        };

        let result = RetryIf::spawn(get_retry_strategy(), action, condition).await;
        let elapsed = started.elapsed();

        if elapsed > SLOW_QUERY_THRESHOLD {
            self.stats.record_slow_query();
            warn!(
                "Slow query ({:?}, {} attempts, {} rows): {}",
                elapsed,
                attempts.load(Ordering::SeqCst),
                result.as_ref().map(|r| r.row_count).unwrap_or(0),
                sql_preview(sql)
            );
        }

        if result.is_ok() {
            self.stats.record_success(elapsed);
        }
        result
    }

    pub fn stats(&self) -> &Arc<QueryStats> {
        &self.stats
    }

    pub fn coordinator(&self) -> &Arc<PoolResetCoordinator> {
        &self.coordinator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionConfig, DeploymentContext};
    use crate::error_handling::ErrorKind;
    use crate::storage::{PoolConnector, PoolHandle, PoolOccupancy, Record};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays a fixed sequence of outcomes, then succeeds.
    struct ScriptedHandle {
        script: Mutex<VecDeque<Result<(), DbError>>>,
        calls: AtomicU32,
    }

    impl ScriptedHandle {
        fn new(script: Vec<Result<(), DbError>>) -> Arc<Self> {
            Arc::new(ScriptedHandle {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl PoolHandle for ScriptedHandle {
        async fn query(&self, _sql: &str, _params: &[SqlValue]) -> Result<QueryResult, DbError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
            next.map(|()| {
                let mut record = Record::new();
                record.push("ok", SqlValue::Bool(true));
                QueryResult::from_rows(vec![record])
            })
        }

        fn occupancy(&self) -> PoolOccupancy {
            PoolOccupancy::from_counts(1, 1, 0, 1)
        }

        async fn teardown(&self) {}

        fn is_closed(&self) -> bool {
            false
        }
    }

    struct NoConnector;

    #[async_trait]
    impl PoolConnector for NoConnector {
        async fn connect(&self, _config: &ConnectionConfig) -> Result<Arc<dyn PoolHandle>, DbError> {
            Err(DbError::connectivity("unused"))
        }
    }

    fn executor(handle: Arc<ScriptedHandle>) -> QueryExecutor {
        let coordinator = PoolResetCoordinator::new(
            ConnectionConfig::new(DeploymentContext::Internal, "postgres://db"),
            Arc::new(NoConnector),
            handle,
        );
        QueryExecutor::new(Arc::new(coordinator), Arc::new(QueryStats::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failures_back_off_then_succeed() {
        let handle = ScriptedHandle::new(vec![
            Err(DbError::connectivity("connection reset")),
            Err(DbError::connectivity("connection reset")),
        ]);
        let executor = executor(Arc::clone(&handle));

        let started = tokio::time::Instant::now();
        let result = executor.execute("SELECT 1", &[]).await.expect("third attempt succeeds");
        assert_eq!(result.row_count, 1);
        assert_eq!(handle.calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(executor.stats().retries(), 2);
        assert_eq!(executor.stats().failure_count(ErrorKind::Connectivity), 2);
        assert_eq!(executor.stats().successes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_is_bounded() {
        let handle = ScriptedHandle::new((0..10).map(|_| Err(DbError::timeout("timed out"))).collect());
        let executor = executor(Arc::clone(&handle));

        let started = tokio::time::Instant::now();
        let err = executor.execute("SELECT 1", &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.attempts(), 4);
        assert_eq!(handle.calls.load(Ordering::SeqCst), 4);
        assert!(started.elapsed() >= Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_returns_after_one_attempt() {
        let handle = ScriptedHandle::new(vec![Err(
            DbError::schema("relation \"missing\" does not exist").with_code("42P01"),
        )]);
        let executor = executor(Arc::clone(&handle));

        let started = tokio::time::Instant::now();
        let err = executor.execute("SELECT * FROM missing", &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
        assert_eq!(err.code(), Some("42P01"));
        assert_eq!(err.attempts(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(executor.stats().retries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatched_write_is_not_retried() {
        let handle = ScriptedHandle::new(vec![Err(DbError::connectivity("broken pipe"))]);
        let executor = executor(Arc::clone(&handle));

        let err = executor
            .execute("INSERT INTO t VALUES ($1)", &[SqlValue::Int(1)])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connectivity);
        assert_eq!(err.attempts(), 1);
        assert_eq!(handle.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undispatched_write_is_retried() {
        let handle = ScriptedHandle::new(vec![Err(
            DbError::timeout("pool timed out while waiting for an open connection").not_dispatched(),
        )]);
        let executor = executor(Arc::clone(&handle));

        executor
            .execute("INSERT INTO t VALUES ($1)", &[SqlValue::Int(1)])
            .await
            .expect("retry after acquire timeout");
        assert_eq!(handle.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicitly_idempotent_write_is_retried() {
        let handle = ScriptedHandle::new(vec![Err(DbError::connectivity("connection reset"))]);
        let executor = executor(Arc::clone(&handle));

        let request = QueryRequest::new(
            "INSERT INTO t VALUES ($1) ON CONFLICT DO NOTHING",
            vec![SqlValue::Int(1)],
        )
        .idempotent(true);
        executor.execute_request(&request).await.expect("retried");
        assert_eq!(handle.calls.load(Ordering::SeqCst), 2);
    }
}
