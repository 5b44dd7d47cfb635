//! Concurrent writer/flush workload driver.
//!
//! Writer threads produce and release tokens on pseudo-random lids while a
//! flush thread cycles snapshot tokens and samples the global state. After all
//! threads have joined the tracker must have converged to
//! [`CommitState::Completed`] with an empty table.
//!
//! # Logging
//!
//! - **INFO**  `lct::workload`: `workload_start`, `workload_done`
//! - **DEBUG** `lct::workload`: `writer_done`, `flusher_done`
//! - **ERROR** `lct::workload`: `workload_not_converged`

use crate::{LidCommitState, PendingLidTracker, TrackerStats};
use lct_error::LctError;
use lct_types::{CommitState, Lid, TrackerKind};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Instant;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkloadConfig {
    /// Number of writer threads.
    pub writers: u32,
    /// Lids are drawn from `0..lid_count`.
    pub lid_count: u32,
    /// Tokens each writer produces.
    pub ops_per_writer: u32,
    /// Snapshot cycles the flush thread runs.
    pub flush_cycles: u32,
    /// Yields while a token is held, to widen the overlap window.
    pub hold_yields: u32,
    pub seed: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            writers: 4,
            lid_count: 64,
            ops_per_writer: 1_000,
            flush_cycles: 200,
            hold_yields: 1,
            seed: 0x5EED,
        }
    }
}

impl WorkloadConfig {
    #[must_use]
    pub fn with_writers(mut self, writers: u32) -> Self {
        self.writers = writers;
        self
    }

    #[must_use]
    pub fn with_lid_count(mut self, lid_count: u32) -> Self {
        self.lid_count = lid_count;
        self
    }

    #[must_use]
    pub fn with_ops_per_writer(mut self, ops_per_writer: u32) -> Self {
        self.ops_per_writer = ops_per_writer;
        self
    }

    #[must_use]
    pub fn with_flush_cycles(mut self, flush_cycles: u32) -> Self {
        self.flush_cycles = flush_cycles;
        self
    }

    #[must_use]
    pub fn with_hold_yields(mut self, hold_yields: u32) -> Self {
        self.hold_yields = hold_yields;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// # Errors
    ///
    /// [`LctError::InvalidConfig`] when there are no writers or no lids.
    pub fn validate(&self) -> lct_error::Result<()> {
        if self.writers == 0 {
            return Err(LctError::InvalidConfig("writers must be at least 1".to_owned()));
        }
        if self.lid_count == 0 {
            return Err(LctError::InvalidConfig("lid_count must be at least 1".to_owned()));
        }
        Ok(())
    }
}

/// Global states sampled by the flush thread while its snapshot was live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StateSamples {
    pub need_commit: u64,
    pub waiting: u64,
    pub completed: u64,
}

impl StateSamples {
    fn record(&mut self, state: CommitState) {
        match state {
            CommitState::NeedCommit => self.need_commit += 1,
            CommitState::Waiting => self.waiting += 1,
            CommitState::Completed => self.completed += 1,
        }
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.need_commit + self.waiting + self.completed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadReport {
    pub kind: TrackerKind,
    pub config: WorkloadConfig,
    pub tokens_produced: u64,
    pub snapshots_produced: u64,
    pub samples: StateSamples,
    pub final_state: CommitState,
    pub final_stats: TrackerStats,
    pub elapsed_ms: u64,
}

/// Drive `tracker` with `config` and check that it converges.
///
/// # Errors
///
/// - [`LctError::InvalidConfig`] if `config` fails validation.
/// - [`LctError::NotConverged`] if a writer ever saw its own live lid read as
///   completed, or if the tracker is not empty once every token is released.
pub fn run_workload<T>(tracker: &T, config: &WorkloadConfig) -> lct_error::Result<WorkloadReport>
where
    T: PendingLidTracker + ?Sized,
{
    config.validate()?;
    let kind = tracker.kind();
    info!(
        target: "lct::workload",
        %kind,
        writers = config.writers,
        lid_count = config.lid_count,
        ops_per_writer = config.ops_per_writer,
        flush_cycles = config.flush_cycles,
        seed = config.seed,
        "workload_start"
    );

    let started = Instant::now();
    let tokens_produced = AtomicU64::new(0);
    let lost_charges = AtomicU64::new(0);
    let writers_done = AtomicBool::new(false);

    let (samples, snapshots_produced) = thread::scope(|scope| {
        let flusher = scope.spawn(|| flush_loop(tracker, config, &writers_done));
        let writers: Vec<_> = (0..config.writers)
            .map(|writer_id| {
                let tokens_produced = &tokens_produced;
                let lost_charges = &lost_charges;
                scope.spawn(move || {
                    write_loop(tracker, config, writer_id, tokens_produced, lost_charges);
                })
            })
            .collect();
        for writer in writers {
            if writer.join().is_err() {
                error!(target: "lct::workload", "writer thread panicked");
            }
        }
        writers_done.store(true, Ordering::Release);
        flusher.join().unwrap_or_else(|_| {
            error!(target: "lct::workload", "flush thread panicked");
            (StateSamples::default(), 0)
        })
    });

    let final_state = LidCommitState::state(tracker);
    let final_stats = tracker.stats();
    let lost = lost_charges.load(Ordering::Relaxed);
    if lost > 0 || final_state != CommitState::Completed || final_stats.tracked_lids != 0 {
        error!(
            target: "lct::workload",
            lost,
            %final_state,
            tracked_lids = final_stats.tracked_lids,
            pending = ?tracker.pending_lids(),
            "workload_not_converged"
        );
        return Err(LctError::NotConverged(format!(
            "{kind}: {lost} live charges read as completed, final state {final_state}, \
             {} lids still tracked",
            final_stats.tracked_lids
        )));
    }

    let report = WorkloadReport {
        kind,
        config: *config,
        tokens_produced: tokens_produced.load(Ordering::Relaxed),
        snapshots_produced,
        samples,
        final_state,
        final_stats,
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    };
    info!(
        target: "lct::workload",
        %kind,
        tokens = report.tokens_produced,
        snapshots = report.snapshots_produced,
        elapsed_ms = report.elapsed_ms,
        "workload_done"
    );
    Ok(report)
}

fn write_loop<T>(
    tracker: &T,
    config: &WorkloadConfig,
    writer_id: u32,
    tokens_produced: &AtomicU64,
    lost_charges: &AtomicU64,
) where
    T: PendingLidTracker + ?Sized,
{
    let mut rng_state = config.seed
        ^ u64::from(writer_id)
            .wrapping_add(1)
            .wrapping_mul(0x9E37_79B9_7F4A_7C15);
    for _ in 0..config.ops_per_writer {
        let lid = choose_lid(&mut rng_state, config.lid_count);
        let token = tracker.produce(lid);
        tokens_produced.fetch_add(1, Ordering::Relaxed);
        for _ in 0..config.hold_yields {
            thread::yield_now();
        }
        if LidCommitState::lid_state(tracker, lid) == CommitState::Completed {
            lost_charges.fetch_add(1, Ordering::Relaxed);
        }
        drop(token);
    }
    debug!(target: "lct::workload", writer_id, "writer_done");
}

fn flush_loop<T>(
    tracker: &T,
    config: &WorkloadConfig,
    writers_done: &AtomicBool,
) -> (StateSamples, u64)
where
    T: PendingLidTracker + ?Sized,
{
    let mut samples = StateSamples::default();
    let mut snapshots = 0_u64;
    for _ in 0..config.flush_cycles {
        if writers_done.load(Ordering::Acquire) {
            break;
        }
        let snapshot = tracker.produce_snapshot();
        snapshots += 1;
        thread::yield_now();
        samples.record(tracker.state());
        drop(snapshot);
    }
    debug!(target: "lct::workload", snapshots, "flusher_done");
    (samples, snapshots)
}

fn lcg_next(state: &mut u64) -> u64 {
    *state = state
        .wrapping_mul(6_364_136_223_846_793_005)
        .wrapping_add(1);
    *state
}

fn choose_lid(rng_state: &mut u64, lid_count: u32) -> Lid {
    let raw = (lcg_next(rng_state) >> 33) % u64::from(lid_count);
    Lid(u32::try_from(raw).unwrap_or(0))
}
