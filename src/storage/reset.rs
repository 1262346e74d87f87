//! Ownership of the current pool handle and its atomic replacement.
//!
//! The current handle is the only piece of shared mutable state in the access
//! layer. Readers clone the `Arc` under a read lock; [`PoolResetCoordinator::reset`]
//! is the only writer and publishes a fully built replacement in one step, so
//! a reader sees either the old handle or the new one, never a half-closed gap.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use log::{error, info, warn};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::config::{ConnectionConfig, LIVENESS_QUERY};
use crate::error_handling::DbError;
use crate::storage::pool::{PoolConnector, PoolHandle};

/// What a call to [`PoolResetCoordinator::reset`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    /// A new handle is current; the old one is being torn down.
    Replaced,
    /// Another reset was already running; nothing was done.
    AlreadyInProgress,
}

/// Holds the current [`PoolHandle`] and replaces it on demand.
pub struct PoolResetCoordinator {
    config: ConnectionConfig,
    connector: Arc<dyn PoolConnector>,
    current: RwLock<Arc<dyn PoolHandle>>,
    reset_in_flight: Mutex<()>,
    generation: AtomicU64,
    pending_teardowns: StdMutex<Vec<JoinHandle<()>>>,
}

impl PoolResetCoordinator {
    pub fn new(
        config: ConnectionConfig,
        connector: Arc<dyn PoolConnector>,
        initial: Arc<dyn PoolHandle>,
    ) -> Self {
        PoolResetCoordinator {
            config,
            connector,
            current: RwLock::new(initial),
            reset_in_flight: Mutex::new(()),
            generation: AtomicU64::new(0),
            pending_teardowns: StdMutex::new(Vec::new()),
        }
    }

    /// The handle every caller should use right now.
    pub async fn current(&self) -> Arc<dyn PoolHandle> {
        Arc::clone(&*self.current.read().await)
    }

    /// Number of successful resets so far. Starts at 0.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Replaces the current handle with a freshly built one.
    ///
    /// The replacement is built from the unchanged config and must answer a
    /// liveness probe before it is published. The old handle is then torn
    /// down in the background.
    ///
    /// # Errors
    ///
    /// Returns a `Reset` error when the replacement cannot be built or is not
    /// ready. The old handle stays current in that case.
    pub async fn reset(&self) -> Result<ResetOutcome, DbError> {
        let _in_flight = match self.reset_in_flight.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("Connection pool reset already in progress, skipping");
                return Ok(ResetOutcome::AlreadyInProgress);
            }
        };

        info!("Attempting connection pool reset...");
        let fresh = self
            .connector
            .connect(&self.config)
            .await
            .map_err(DbError::reset)?;

        if let Err(e) = fresh.query(LIVENESS_QUERY, &[]).await {
            error!("Replacement pool failed its readiness probe: {}", e);
            self.schedule_teardown(fresh);
            return Err(DbError::reset(e));
        }

        let old = {
            let mut current = self.current.write().await;
            std::mem::replace(&mut *current, fresh)
        };
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Connection pool reset successfully (generation {})", generation);

        self.schedule_teardown(old);
        Ok(ResetOutcome::Replaced)
    }

    /// Tears down the current handle and waits for every scheduled teardown.
    pub async fn teardown_all(&self) {
        self.current().await.teardown().await;
        self.wait_for_teardowns().await;
    }

    /// Waits for background teardowns started by previous resets.
    pub async fn wait_for_teardowns(&self) {
        let pending: Vec<JoinHandle<()>> = {
            let mut guard = self
                .pending_teardowns
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.drain(..).collect()
        };
        for task in pending {
            if let Err(e) = task.await {
                error!("Pool teardown task failed: {}", e);
            }
        }
    }

    fn schedule_teardown(&self, handle: Arc<dyn PoolHandle>) {
        let task = tokio::spawn(async move {
            handle.teardown().await;
        });
        let mut guard = self
            .pending_teardowns
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.retain(|t| !t.is_finished());
        guard.push(task);
    }
}
