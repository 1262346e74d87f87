//! Graceful shutdown handling.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use log::{debug, warn};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::SHUTDOWN_DRAIN_POLL;

/// Stops a background task and waits for it to finish.
pub async fn stop_background_task(cancel: &CancellationToken, task: Option<JoinHandle<()>>) {
    cancel.cancel();
    if let Some(task) = task {
        if let Err(e) = task.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }
}

/// Waits until `in_flight` drops to zero or `grace` elapses.
///
/// Returns the number of executions still running when the wait ended.
pub async fn drain_in_flight(in_flight: &AtomicUsize, grace: Duration) -> usize {
    let deadline = Instant::now() + grace;
    loop {
        let running = in_flight.load(Ordering::SeqCst);
        if running == 0 {
            return 0;
        }
        if Instant::now() >= deadline {
            warn!(
                "Grace period of {:?} elapsed with {} execution(s) still running",
                grace, running
            );
            return running;
        }
        debug!("Waiting for {} in-flight execution(s)", running);
        tokio::time::sleep(SHUTDOWN_DRAIN_POLL).await;
    }
}

/// Counts one running execution for as long as it lives.
pub struct InFlightGuard<'a>(&'a AtomicUsize);

impl<'a> InFlightGuard<'a> {
    pub fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(counter)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
