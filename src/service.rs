//! The database service handed to every collaborator.
//!
//! `Database` is constructed explicitly by the composition root and cloned
//! into whatever needs it; clones share one pool, one monitor and one set of
//! statistics. Nothing in the crate is a process-wide global.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app::{drain_in_flight, stop_background_task, InFlightGuard};
use crate::config::{ConnectionConfig, SHUTDOWN_GRACE_PERIOD};
use crate::error_handling::{DbError, QueryStats};
use crate::executor::{QueryExecutor, QueryRequest};
use crate::health::{HealthEvent, HealthMonitor, HealthState};
use crate::status::{DatabaseDetails, HealthSnapshot, StatusReporter};
use crate::storage::{
    initialize, PgConnector, PoolConnector, PoolOccupancy, PoolResetCoordinator, QueryResult,
    SqlValue,
};

/// Cheaply cloneable handle to the resilient access layer.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

struct Inner {
    coordinator: Arc<PoolResetCoordinator>,
    executor: QueryExecutor,
    monitor: Arc<HealthMonitor>,
    reporter: StatusReporter,
    stats: Arc<QueryStats>,
    monitor_shutdown: CancellationToken,
    monitor_task: StdMutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    shutdown_done: Mutex<bool>,
    in_flight: AtomicUsize,
}

impl Database {
    /// Builds the service on a lazily connecting PostgreSQL pool.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error when no endpoint is configured or the
    /// URL cannot be parsed.
    pub async fn connect(config: ConnectionConfig) -> Result<Self, DbError> {
        Database::with_connector(config, Arc::new(PgConnector)).await
    }

    /// Builds the service on pools produced by `connector`.
    pub async fn with_connector(
        config: ConnectionConfig,
        connector: Arc<dyn PoolConnector>,
    ) -> Result<Self, DbError> {
        let initial = initialize(&config, connector.as_ref()).await?;
        let coordinator = Arc::new(PoolResetCoordinator::new(config, connector, initial));
        let stats = Arc::new(QueryStats::new());
        let executor = QueryExecutor::new(Arc::clone(&coordinator), Arc::clone(&stats));
        let monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&coordinator),
            Arc::clone(&stats),
        ));
        let reporter = StatusReporter::new(executor.clone(), Arc::clone(&monitor));

        Ok(Database {
            inner: Arc::new(Inner {
                coordinator,
                executor,
                monitor,
                reporter,
                stats,
                monitor_shutdown: CancellationToken::new(),
                monitor_task: StdMutex::new(None),
                closed: AtomicBool::new(false),
                shutdown_done: Mutex::new(false),
                in_flight: AtomicUsize::new(0),
            }),
        })
    }

    /// Runs one statement; idempotency is inferred from its text.
    ///
    /// # Errors
    ///
    /// Any [`crate::ErrorKind`]; `Configuration` once the service is shut down.
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, DbError> {
        self.execute_request(&QueryRequest::new(sql, params.to_vec()))
            .await
    }

    /// Runs one statement with caller-controlled idempotency.
    pub async fn execute_request(&self, request: &QueryRequest) -> Result<QueryResult, DbError> {
        let _in_flight = self.enter()?;
        self.inner.executor.execute_request(request).await
    }

    /// Counts one operation as in flight, refusing once shutdown has begun.
    fn enter(&self) -> Result<InFlightGuard<'_>, DbError> {
        self.ensure_open()?;
        let guard = InFlightGuard::enter(&self.inner.in_flight);
        // Shutdown may have started between the check and the increment.
        self.ensure_open()?;
        Ok(guard)
    }

    fn ensure_open(&self) -> Result<(), DbError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(DbError::configuration("database service has been shut down").not_dispatched());
        }
        Ok(())
    }

    /// Fresh probe plus occupancy, environment and monitor state.
    pub async fn snapshot(&self) -> HealthSnapshot {
        self.inner.reporter.snapshot().await
    }

    /// Server facts and largest tables; after shutdown, an unhealthy value
    /// without touching the pool.
    pub async fn database_details(&self) -> DatabaseDetails {
        let _in_flight = match self.enter() {
            Ok(guard) => guard,
            Err(e) => {
                return DatabaseDetails::unhealthy(
                    self.inner.coordinator.config().context,
                    e.to_string(),
                    None,
                )
            }
        };
        self.inner.reporter.database_details().await
    }

    /// Starts the background probe loop. Calling it again, or after
    /// shutdown, does nothing and returns `false`.
    pub fn start_health_monitor(&self, period: Duration) -> bool {
        if self.inner.closed.load(Ordering::SeqCst) {
            warn!("Not starting health monitor: service is shut down");
            return false;
        }
        let mut task = self
            .inner
            .monitor_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if task.is_some() {
            debug!("Health monitor already running");
            return false;
        }
        *task = Some(
            Arc::clone(&self.inner.monitor)
                .spawn(period, self.inner.monitor_shutdown.clone()),
        );
        true
    }

    pub async fn health_state(&self) -> HealthState {
        self.inner.monitor.state().await
    }

    pub fn subscribe_health_events(&self) -> broadcast::Receiver<HealthEvent> {
        self.inner.monitor.subscribe()
    }

    /// Connection counts of the current pool.
    pub async fn pool_status(&self) -> PoolOccupancy {
        self.inner.coordinator.current().await.occupancy()
    }

    /// Number of pool resets since startup.
    pub fn pool_generation(&self) -> u64 {
        self.inner.coordinator.generation()
    }

    pub fn stats(&self) -> Arc<QueryStats> {
        Arc::clone(&self.inner.stats)
    }

    pub fn config(&self) -> &ConnectionConfig {
        self.inner.coordinator.config()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Stops the monitor, lets in-flight executions finish within
    /// `SHUTDOWN_GRACE_PERIOD`, then closes every pool.
    ///
    /// Idempotent: later calls return once the first one has completed.
    pub async fn shutdown(&self) {
        self.shutdown_with_grace(SHUTDOWN_GRACE_PERIOD).await;
    }

    pub async fn shutdown_with_grace(&self, grace: Duration) {
        let mut done = self.inner.shutdown_done.lock().await;
        if *done {
            debug!("Database service already shut down");
            return;
        }

        info!("Shutting down database service...");
        self.inner.closed.store(true, Ordering::SeqCst);

        let task = self
            .inner
            .monitor_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        stop_background_task(&self.inner.monitor_shutdown, task).await;

        drain_in_flight(&self.inner.in_flight, grace).await;
        self.inner.coordinator.teardown_all().await;

        *done = true;
        info!("Database service shut down");
    }
}
