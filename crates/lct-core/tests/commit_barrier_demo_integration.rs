use lct_core::demo::run_commit_barrier_demo;
use lct_types::{CommitState, TrackerKind};

#[test]
fn commit_barrier_demo_invariant() {
    for kind in [TrackerKind::SinglePhase, TrackerKind::TwoPhase] {
        let result = run_commit_barrier_demo(kind);
        assert_eq!(result.kind, kind);
        assert!(result.passed, "{kind}: {:#?}", result.checks);

        let last = result.checks.last().expect("demo records checks");
        assert_eq!(last.observed, CommitState::Completed, "{kind} must end completed");
    }
}

#[test]
fn two_phase_demo_never_reports_waiting_without_snapshot() {
    let result = run_commit_barrier_demo(TrackerKind::TwoPhase);
    for check in &result.checks {
        if check.observed == CommitState::Waiting {
            assert!(
                check.step.contains("snapshot"),
                "waiting reported outside a snapshot: {check:?}"
            );
        }
    }
}
