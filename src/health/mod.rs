//! Background liveness monitoring and self-healing.
//!
//! The monitor probes the current pool on a fixed interval, bypassing the
//! retrying executor so each failed probe counts exactly once. After
//! `RESET_THRESHOLD` consecutive failures it asks the reset coordinator for a
//! fresh pool. The probe loop is the only writer of [`HealthState`].

mod state;

pub use state::{HealthEvent, HealthState, HealthStatus};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{HEALTH_EVENT_CAPACITY, LIVENESS_QUERY, RESET_THRESHOLD};
use crate::error_handling::QueryStats;
use crate::storage::{PoolResetCoordinator, ResetOutcome};

/// Periodic pool prober.
pub struct HealthMonitor {
    coordinator: Arc<PoolResetCoordinator>,
    stats: Arc<QueryStats>,
    state: RwLock<HealthState>,
    events: broadcast::Sender<HealthEvent>,
    reset_threshold: u32,
}

impl HealthMonitor {
    pub fn new(coordinator: Arc<PoolResetCoordinator>, stats: Arc<QueryStats>) -> Self {
        let (events, _) = broadcast::channel(HEALTH_EVENT_CAPACITY);
        HealthMonitor {
            coordinator,
            stats,
            state: RwLock::new(HealthState::default()),
            events,
            reset_threshold: RESET_THRESHOLD,
        }
    }

    /// Copy of the current state.
    pub async fn state(&self) -> HealthState {
        self.state.read().await.clone()
    }

    /// Receives every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.events.subscribe()
    }

    /// Runs one probe and applies its outcome, resetting the pool when the
    /// failure count reaches the threshold.
    ///
    /// Never fails: probe and reset errors are logged, counted and published.
    pub async fn probe_once(&self) -> HealthState {
        let handle = self.coordinator.current().await;
        let outcome = handle.query(LIVENESS_QUERY, &[]).await;
        let probed_at = Utc::now();

        let failures = match outcome {
            Ok(_) => {
                let mut state = self.state.write().await;
                let previous = std::mem::take(&mut state.consecutive_failures);
                state.last_probe_at = Some(probed_at);
                if state.status == HealthStatus::Degraded {
                    state.status = HealthStatus::Healthy;
                    info!("Database recovered after {} failed probe(s)", previous);
                    self.publish(HealthEvent::Recovered {
                        after_failures: previous,
                    });
                } else {
                    debug!("Health probe succeeded");
                }
                return state.clone();
            }
            Err(e) => {
                self.stats.record_probe_failure();
                let failures = {
                    let mut state = self.state.write().await;
                    state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                    state.last_probe_at = Some(probed_at);
                    state.status = HealthStatus::Degraded;
                    state.consecutive_failures
                };
                warn!("Health probe failed ({} consecutive): {}", failures, e);
                self.publish(HealthEvent::ProbeFailed {
                    consecutive_failures: failures,
                    error: e.to_string(),
                });
                failures
            }
        };

        if failures >= self.reset_threshold {
            self.trigger_reset(failures).await;
        }
        self.state().await
    }

    async fn trigger_reset(&self, failures: u32) {
        warn!(
            "{} consecutive probe failures (threshold {}), resetting connection pool",
            failures, self.reset_threshold
        );
        match self.coordinator.reset().await {
            Ok(ResetOutcome::Replaced) => {
                self.stats.record_reset(true);
                self.publish(HealthEvent::ResetSucceeded {
                    generation: self.coordinator.generation(),
                });
            }
            Ok(ResetOutcome::AlreadyInProgress) => {}
            Err(e) => {
                error!("Connection pool reset failed, staying degraded: {}", e);
                self.stats.record_reset(false);
                self.publish(HealthEvent::ResetFailed {
                    error: e.to_string(),
                });
            }
        }
    }

    fn publish(&self, event: HealthEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    /// Starts the probe loop. The first probe runs one `period` from now.
    ///
    /// Ticks that come due while a probe (or the reset it triggered) is still
    /// running are skipped, so probes never overlap.
    pub fn spawn(self: Arc<Self>, period: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        info!("Starting health monitor (interval {:?})", period);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.probe_once().await;
                    }
                    _ = shutdown.cancelled() => {
                        info!("Health monitor stopped");
                        break;
                    }
                }
            }
        })
    }
}
