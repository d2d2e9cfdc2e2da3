//! Bounded pool of concurrently running rollouts.
//!
//! Each job runs one [`InteractionCoordinator`] rollout as its own tokio
//! task. A semaphore caps how many rollouts are in flight at once; this cap
//! is independent of the model-call gate, so a rollout holds a worker slot
//! for its whole life but only waits on the gate while calling the model.
//!
//! # Features
//!
//! - Per-rollout isolation: jobs share nothing but the coordinator's
//!   read-only configuration and the model gate behind it
//! - Graceful shutdown with a broadcast channel: jobs that have not started
//!   are skipped, in-flight rollouts end as `fatal_error`
//! - Pool statistics tracked with atomics owned by the pool

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::coordinator::{CancelSignal, InteractionCoordinator, Rollout};
use crate::trajectory::{TerminationReason, Trajectory};

/// One rollout scheduled on the pool.
#[derive(Debug, Clone)]
pub struct RolloutJob {
    /// Position in the submitted batch. Results are reported in this order.
    pub index: usize,
    pub rollout: Rollout,
}

impl RolloutJob {
    pub fn new(index: usize, rollout: Rollout) -> Self {
        Self { index, rollout }
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolStats {
    pub max_workers: usize,
    /// Rollouts running right now.
    pub active_workers: usize,
    /// Rollouts that ended with `goal_reached` or `max_turns`.
    pub completed: u64,
    /// Rollouts that ended with `protocol_violation` or `fatal_error`.
    pub failed: u64,
    /// Jobs never started because the pool was shut down.
    pub skipped: u64,
    pub by_termination: BTreeMap<TerminationReason, u64>,
    pub average_duration_ms: u64,
}

impl PoolStats {
    /// Returns the total number of rollouts processed (completed + failed).
    pub fn total_processed(&self) -> u64 {
        self.completed + self.failed
    }

    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.completed as f64 / total as f64) * 100.0
    }

    pub fn count(&self, reason: TerminationReason) -> u64 {
        self.by_termination.get(&reason).copied().unwrap_or(0)
    }
}

/// Shared state for tracking pool statistics.
struct SharedPoolStats {
    by_termination: [AtomicU64; 4],
    skipped: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
}

fn slot(reason: TerminationReason) -> usize {
    match reason {
        TerminationReason::GoalReached => 0,
        TerminationReason::MaxTurns => 1,
        TerminationReason::ProtocolViolation => 2,
        TerminationReason::FatalError => 3,
    }
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            by_termination: Default::default(),
            skipped: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
        }
    }

    fn record(&self, reason: TerminationReason, duration: Duration) {
        self.by_termination[slot(reason)].fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_active(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, max_workers: usize) -> PoolStats {
        let by_termination: BTreeMap<_, _> = TerminationReason::ALL
            .iter()
            .map(|r| (*r, self.by_termination[slot(*r)].load(Ordering::SeqCst)))
            .collect();
        let completed = by_termination[&TerminationReason::GoalReached]
            + by_termination[&TerminationReason::MaxTurns];
        let failed = by_termination[&TerminationReason::ProtocolViolation]
            + by_termination[&TerminationReason::FatalError];

        let total = completed + failed;
        let average_duration_ms = if total > 0 {
            self.total_duration_ms.load(Ordering::SeqCst) / total
        } else {
            0
        };

        PoolStats {
            max_workers,
            active_workers: self.active_workers.load(Ordering::SeqCst) as usize,
            completed,
            failed,
            skipped: self.skipped.load(Ordering::SeqCst),
            by_termination,
            average_duration_ms,
        }
    }
}

/// Cloneable handle that stops a running pool.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
    requested: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Skips jobs that have not started and cancels in-flight rollouts.
    pub fn trigger(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            info!("Initiating worker pool shutdown");
            // No receivers just means no job is running.
            let _ = self.tx.send(());
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Resolves once shutdown has been requested.
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        if self.is_triggered() {
            return;
        }
        // The handle owns a sender, so the channel cannot close under us.
        let _ = rx.recv().await;
    }
}

/// Result of running a batch of jobs.
#[derive(Debug, Default)]
pub struct PoolReport {
    /// Finished trajectories, ordered by job index.
    pub trajectories: Vec<Trajectory>,
    /// Indices of jobs that never started.
    pub skipped: Vec<usize>,
    /// Jobs whose task panicked.
    pub panicked: usize,
    pub stats: PoolStats,
}

enum JobOutcome {
    Finished(usize, Box<Trajectory>),
    Skipped(usize),
}

/// Pool that runs rollouts with at most `max_workers` in flight.
pub struct WorkerPool {
    max_workers: usize,
    coordinator: Arc<InteractionCoordinator>,
    shutdown: ShutdownHandle,
    stats: Arc<SharedPoolStats>,
}

impl WorkerPool {
    pub fn new(max_workers: usize, coordinator: Arc<InteractionCoordinator>) -> Self {
        // Buffer size of 1 is sufficient since we only send once
        let (tx, _) = broadcast::channel(1);
        Self {
            max_workers: max_workers.max(1),
            coordinator,
            shutdown: ShutdownHandle {
                tx,
                requested: Arc::new(AtomicBool::new(false)),
            },
            stats: Arc::new(SharedPoolStats::new()),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.max_workers)
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Runs every job to a terminal state, or skips it after shutdown.
    ///
    /// A failed rollout never affects the others.
    pub async fn run(&self, jobs: Vec<RolloutJob>) -> PoolReport {
        let total = jobs.len();
        info!(jobs = total, max_workers = self.max_workers, "Worker pool started");

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut set = JoinSet::new();

        for job in jobs {
            let semaphore = Arc::clone(&semaphore);
            let coordinator = Arc::clone(&self.coordinator);
            let stats = Arc::clone(&self.stats);
            let requested = Arc::clone(&self.shutdown.requested);
            // Subscribe now so a shutdown sent while waiting for a slot is seen.
            let rx = self.shutdown.tx.subscribe();

            set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    stats.record_skipped();
                    return JobOutcome::Skipped(job.index);
                };
                let mut cancel = CancelSignal::new(rx);
                if requested.load(Ordering::SeqCst) || cancel.is_cancelled() {
                    debug!(job = job.index, "Skipping job after shutdown");
                    stats.record_skipped();
                    return JobOutcome::Skipped(job.index);
                }

                stats.increment_active();
                let start = Instant::now();
                let trajectory = coordinator.run(&job.rollout, cancel).await;
                stats.decrement_active();
                stats.record(trajectory.termination, start.elapsed());

                JobOutcome::Finished(job.index, Box::new(trajectory))
            });
        }

        let mut finished = Vec::with_capacity(total);
        let mut report = PoolReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(JobOutcome::Finished(index, trajectory)) => finished.push((index, *trajectory)),
                Ok(JobOutcome::Skipped(index)) => report.skipped.push(index),
                Err(e) => {
                    error!(error = %e, "Rollout task panicked");
                    report.panicked += 1;
                }
            }
        }

        finished.sort_by_key(|(index, _)| *index);
        report.trajectories = finished.into_iter().map(|(_, t)| t).collect();
        report.skipped.sort_unstable();
        report.stats = self.stats();

        if !report.skipped.is_empty() {
            warn!(skipped = report.skipped.len(), "Jobs skipped after shutdown");
        }
        info!(
            completed = report.stats.completed,
            failed = report.stats.failed,
            skipped = report.stats.skipped,
            panicked = report.panicked,
            avg_duration_ms = report.stats.average_duration_ms,
            "Worker pool finished"
        );
        report
    }
}
