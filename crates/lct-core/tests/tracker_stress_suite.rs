use lct_core::{LidCommitState, LidCommitTracker, LidScope, PendingLidTracker, TrackerStats};
use lct_types::{CommitState, Lid, TrackerKind};
use std::sync::Barrier;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}

fn lcg_next(state: &mut u64) -> u64 {
    *state = state
        .wrapping_mul(6_364_136_223_846_793_005)
        .wrapping_add(1);
    *state
}

fn choose_lid(rng_state: &mut u64, lid_count: u32) -> Lid {
    let raw = (lcg_next(rng_state) >> 33) % u64::from(lid_count);
    Lid(u32::try_from(raw).expect("lid fits in u32"))
}

#[test]
fn stress_live_tokens_never_read_completed() {
    const WRITERS: u32 = 6;
    const OPS_PER_WRITER: u32 = 500;
    const LID_COUNT: u32 = 16;

    init_tracing();
    for kind in [TrackerKind::SinglePhase, TrackerKind::TwoPhase] {
        for seed in 0_u64..4 {
            let tracker = LidCommitTracker::new(kind);
            let writers_done = AtomicBool::new(false);
            let snapshots = AtomicU64::new(0);
            let start = Barrier::new(usize::try_from(WRITERS + 1).expect("fits in usize"));

            thread::scope(|scope| {
                let flusher = scope.spawn(|| {
                    start.wait();
                    while !writers_done.load(Ordering::Acquire) {
                        let snapshot = tracker.produce_snapshot();
                        snapshots.fetch_add(1, Ordering::Relaxed);
                        if kind == TrackerKind::TwoPhase {
                            assert_ne!(
                                tracker.state(),
                                CommitState::Completed,
                                "{kind} seed {seed}: live snapshot must hold global state"
                            );
                        }
                        thread::yield_now();
                        drop(snapshot);
                    }
                });

                let writers: Vec<_> = (0..WRITERS)
                    .map(|writer_id| {
                        let tracker = &tracker;
                        let start = &start;
                        scope.spawn(move || {
                            let mut rng_state = seed
                                ^ u64::from(writer_id)
                                    .wrapping_add(1)
                                    .wrapping_mul(0x9E37_79B9_7F4A_7C15);
                            start.wait();
                            for op in 0..OPS_PER_WRITER {
                                let lid = choose_lid(&mut rng_state, LID_COUNT);
                                let outer = tracker.produce(lid);
                                let state = tracker.lid_state(lid);
                                assert_ne!(
                                    state,
                                    CommitState::Completed,
                                    "{kind} seed {seed}: writer {writer_id} op {op} lost lid {lid}"
                                );
                                if kind == TrackerKind::SinglePhase {
                                    assert_eq!(state, CommitState::Waiting);
                                }
                                if op % 7 == 0 {
                                    let nested = tracker.produce(lid);
                                    thread::yield_now();
                                    drop(nested);
                                    assert_ne!(tracker.lid_state(lid), CommitState::Completed);
                                }
                                drop(outer);
                            }
                        })
                    })
                    .collect();

                for writer in writers {
                    writer.join().expect("writer thread");
                }
                writers_done.store(true, Ordering::Release);
                flusher.join().expect("flush thread");
            });

            assert_eq!(tracker.state(), CommitState::Completed, "{kind} seed {seed}");
            assert_eq!(tracker.stats(), TrackerStats::default(), "{kind} seed {seed}");
            assert!(tracker.pending_lids().is_empty());
        }
    }
}

#[test]
fn snapshot_covers_only_tokens_live_at_capture() {
    init_tracing();
    let tracker = LidCommitTracker::new(TrackerKind::TwoPhase);
    let held: Vec<_> = (0..8).map(|i| tracker.produce(Lid(i))).collect();
    let snapshot = tracker.produce_snapshot();
    let late: Vec<_> = (4..12).map(|i| tracker.produce(Lid(i))).collect();

    let covered: Vec<Lid> = (0..4).map(Lid).collect();
    let mixed: Vec<Lid> = (4..8).map(Lid).collect();
    let fresh: Vec<Lid> = (8..12).map(Lid).collect();
    assert_eq!(tracker.lids_state(&covered), CommitState::Waiting);
    assert_eq!(tracker.lids_state(&mixed), CommitState::NeedCommit);
    assert_eq!(tracker.lids_state(&fresh), CommitState::NeedCommit);

    drop(late);
    assert_eq!(tracker.lids_state(&mixed), CommitState::Waiting);
    assert_eq!(tracker.lids_state(&fresh), CommitState::Completed);
    assert_eq!(tracker.state(), CommitState::Waiting);

    drop(snapshot);
    assert_eq!(tracker.state(), CommitState::NeedCommit);
    assert_eq!(tracker.pending_lids(), (0..8).map(Lid).collect::<Vec<_>>());
    drop(held);
    assert_eq!(tracker.state(), CommitState::Completed);
}

#[test]
fn flush_thread_waits_for_writers_to_settle() {
    init_tracing();
    let tracker = LidCommitTracker::new(TrackerKind::TwoPhase);
    let lids = [Lid(3), Lid(5), Lid(7)];
    let tokens: Vec<_> = lids.iter().map(|&lid| tracker.produce(lid)).collect();

    thread::scope(|scope| {
        let waiter = scope.spawn(|| {
            tracker.wait_complete(LidScope::Lids(&lids));
            tracker.lids_state(&lids)
        });
        for token in tokens {
            thread::sleep(Duration::from_millis(2));
            scope.spawn(move || drop(token));
        }
        assert_eq!(waiter.join().expect("waiter"), CommitState::Completed);
    });
}

#[test]
fn bounded_wait_times_out_on_leaked_snapshot() {
    init_tracing();
    let tracker = LidCommitTracker::new(TrackerKind::TwoPhase);
    let snapshot = tracker.produce_snapshot();
    let err = tracker
        .wait_state_timeout(
            CommitState::Completed,
            LidScope::All,
            Duration::from_millis(10),
        )
        .expect_err("snapshot still live");
    assert!(err.to_string().contains("all lids"), "{err}");
    drop(snapshot);
    assert_eq!(
        tracker
            .wait_state_timeout(
                CommitState::Completed,
                LidScope::All,
                Duration::from_millis(10)
            )
            .expect("released"),
        CommitState::Completed
    );
}
