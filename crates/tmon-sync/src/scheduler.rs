//! # Timer Jobs
//!
//! Periodic, non-overlapping background work.
//!
//! ## Jobs by Role
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Scheduled Jobs                                 │
//! │                                                                         │
//! │  SPOKE                                                                  │
//! │  ├── claim-reaper    every queue.reap_interval_secs                     │
//! │  │                   claimed older than claim_timeout → queued          │
//! │  └── hub-check-in    every hub.checkin_interval_secs (paired only)      │
//! │                                                                         │
//! │  HUB                                                                    │
//! │  └── count-refresh   every hub.refresh_interval_secs                    │
//! │                                                                         │
//! │  Each tick runs on its own task behind a JobGuard: a tick that finds   │
//! │  the previous run still going is skipped, never queued.                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::aggregator::HubAggregator;
use crate::error::{SyncError, SyncResult};
use crate::pairing::SpokePairing;
use crate::queue::CommandQueue;

// =============================================================================
// Job Guard
// =============================================================================

/// Prevents overlapping runs of one job and remembers the last run.
#[derive(Debug, Clone)]
pub struct JobGuard {
    name: &'static str,
    running: Arc<Mutex<()>>,
    last_run: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl JobGuard {
    pub fn new(name: &'static str) -> Self {
        JobGuard {
            name,
            running: Arc::new(Mutex::new(())),
            last_run: Arc::new(RwLock::new(None)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Runs `job` unless a previous run still holds the guard.
    ///
    /// Returns `None` when skipped.
    pub async fn run<F, Fut, T>(&self, job: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let Ok(_running) = self.running.try_lock() else {
            debug!(job = self.name, "Previous run still in progress, skipping");
            return None;
        };

        let result = job().await;
        *self.last_run.write().await = Some(Utc::now());
        Some(result)
    }

    /// When the last run finished.
    pub async fn last_run(&self) -> Option<DateTime<Utc>> {
        *self.last_run.read().await
    }

    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }
}

// =============================================================================
// Periodic Task
// =============================================================================

/// Handle for a spawned periodic job.
#[derive(Debug)]
pub struct JobHandle {
    guard: JobGuard,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl JobHandle {
    pub fn guard(&self) -> &JobGuard {
        &self.guard
    }

    /// Stops the ticker and waits for it to exit.
    ///
    /// A run already in flight finishes on its own task.
    pub async fn shutdown(self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::Internal(format!("{} job already stopped", self.guard.name)))?;
        self.task
            .await
            .map_err(|e| SyncError::Internal(format!("{} job panicked: {}", self.guard.name, e)))
    }
}

/// Spawns `job` every `period` behind `guard`.
pub fn spawn_periodic<F, Fut>(guard: JobGuard, period: Duration, job: F) -> JobHandle
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
    let ticker_guard = guard.clone();

    let task = tokio::spawn(async move {
        info!(job = ticker_guard.name, period_secs = period.as_secs_f64(), "Job scheduled");

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let guard = ticker_guard.clone();
                    let run = job();
                    tokio::spawn(async move {
                        guard.run(|| run).await;
                    });
                }

                _ = shutdown_rx.recv() => {
                    info!(job = ticker_guard.name, "Job stopped");
                    break;
                }
            }
        }
    });

    JobHandle {
        guard,
        shutdown_tx,
        task,
    }
}

// =============================================================================
// Role Jobs
// =============================================================================

/// Spoke: returns stale claims to the queue.
pub fn spawn_claim_reaper(queue: CommandQueue, claim_timeout: Duration, period: Duration) -> JobHandle {
    spawn_periodic(JobGuard::new("claim-reaper"), period, move || {
        let queue = queue.clone();
        async move {
            if let Err(e) = queue.reap_stale_claims(claim_timeout).await {
                error!(error = %e, "Claim reaper failed");
            }
        }
    })
}

/// Spoke: reports liveness and device count to the hub.
pub fn spawn_hub_check_in(pairing: SpokePairing, period: Duration) -> JobHandle {
    spawn_periodic(JobGuard::new("hub-check-in"), period, move || {
        let pairing = pairing.clone();
        async move {
            match pairing.check_in_with_hub().await {
                Ok(true) => debug!("Checked in with hub"),
                Ok(false) => debug!("Not paired, hub check-in skipped"),
                Err(e) => error!(error = %e, "Hub check-in failed"),
            }
        }
    })
}

/// Hub: refreshes device counts across paired sites.
///
/// Runs behind the aggregator's own guard, so a tick is skipped while a
/// manual refresh is in flight.
pub fn spawn_count_refresh(aggregator: HubAggregator, period: Duration) -> JobHandle {
    let guard = aggregator.guard().clone();
    spawn_periodic(guard, period, move || {
        let aggregator = aggregator.clone();
        async move {
            if let Err(e) = aggregator.refresh_device_counts().await {
                error!(error = %e, "Device count refresh failed");
            }
        }
    })
}
