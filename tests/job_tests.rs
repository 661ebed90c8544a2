mod common;

use chrono::Utc;
use common::{job_key, plan, record, sample_records, FakeServer, MemoryStore, Mode};
use index_rebuilder::checkpoint::Checkpoint;
use index_rebuilder::{
    CheckpointStore, Error, FileCheckpointStore, JobDriver, JobPlan, RebuildCandidate,
    RebuildOutcome, RebuildStatus, SilentReporter,
};
use tempfile::tempdir;

const DEADLOCK: u32 = 1205;
const OFFLINE_ONLY: u32 = 1712;

fn rebuilt_indexes(server: &FakeServer) -> Vec<String> {
    server
        .executed()
        .iter()
        .filter_map(|s| {
            s.strip_prefix("ALTER INDEX [")
                .and_then(|rest| rest.split(']').next())
                .map(str::to_string)
        })
        .collect()
}

fn done(candidate: &RebuildCandidate) -> RebuildOutcome {
    RebuildOutcome {
        candidate: candidate.clone(),
        status: RebuildStatus::Succeeded,
        error: None,
        duration_secs: 0.5,
        finished_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_failure_is_recorded_and_job_completes() {
    let server = FakeServer::new(sample_records());
    server.fail("I3", Mode::Any, DEADLOCK);
    let store = MemoryStore::default();

    let report = JobDriver::new(&server, &store, plan(20, false))
        .run(&SilentReporter)
        .await
        .unwrap();

    assert_eq!(report.total(), 2);
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.resumed_from, None);

    let failure = report.failures().next().unwrap();
    assert_eq!(failure.candidate, RebuildCandidate::new("dbo", "T3", "I3"));
    assert!(failure.error.as_deref().unwrap().contains("1205"));

    assert_eq!(rebuilt_indexes(&server), vec!["I1", "I3"]);
    // Initial list, then once after each attempt.
    assert_eq!(store.saves(), vec![0, 1, 2]);
    assert!(store.current().is_none());
}

#[tokio::test]
async fn test_failure_does_not_stop_later_candidates() {
    let server = FakeServer::new(vec![
        record("A", "IA", 50.0),
        record("B", "IB", 50.0),
        record("C", "IC", 50.0),
    ]);
    server
        .fail("IA", Mode::Any, DEADLOCK)
        .fail("IB", Mode::Any, DEADLOCK);
    let store = MemoryStore::default();

    let report = JobDriver::new(&server, &store, plan(20, false))
        .run(&SilentReporter)
        .await
        .unwrap();

    assert_eq!(rebuilt_indexes(&server), vec!["IA", "IB", "IC"]);
    assert_eq!(report.failed(), 2);
    assert_eq!(report.succeeded(), 1);
    let (opened, closed) = server.connections();
    assert_eq!(opened, closed);
    assert_eq!(opened, 4);
}

#[tokio::test]
async fn test_offline_fallback_in_job() {
    let server = FakeServer::new(sample_records());
    server.fail("I1", Mode::Online, OFFLINE_ONLY);
    let store = MemoryStore::default();

    let report = JobDriver::new(&server, &store, plan(20, true))
        .run(&SilentReporter)
        .await
        .unwrap();

    assert_eq!(report.succeeded_offline(), 1);
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.outcomes[0].status, RebuildStatus::SucceededOffline);
    assert_eq!(rebuilt_indexes(&server), vec!["I1", "I1", "I3"]);
}

#[tokio::test]
async fn test_table_filter_limits_job() {
    let server = FakeServer::new(sample_records());
    let store = MemoryStore::default();
    let plan = JobPlan::new(job_key(20, Some("T1")));

    let report = JobDriver::new(&server, &store, plan)
        .run(&SilentReporter)
        .await
        .unwrap();

    assert_eq!(report.total(), 1);
    assert_eq!(rebuilt_indexes(&server), vec!["I1"]);
}

#[tokio::test]
async fn test_resume_skips_completed_candidates() {
    let server = FakeServer::new(sample_records());
    let candidates = vec![
        RebuildCandidate::new("dbo", "T1", "I1"),
        RebuildCandidate::new("dbo", "T3", "I3"),
        RebuildCandidate::new("dbo", "T4", "I4"),
    ];
    let mut checkpoint = Checkpoint::new(job_key(20, None), candidates);
    checkpoint.record(done(&checkpoint.candidates[0].clone()));
    let store = MemoryStore::with(checkpoint);

    let report = JobDriver::new(&server, &store, plan(20, false))
        .run(&SilentReporter)
        .await
        .unwrap();

    // Resumes against the saved list, not a fresh scan.
    assert_eq!(server.scans(), 0);
    assert_eq!(rebuilt_indexes(&server), vec!["I3", "I4"]);
    assert_eq!(report.resumed_from, Some(1));
    assert_eq!(report.total(), 3);
    assert_eq!(report.succeeded(), 3);
    assert_eq!(store.saves(), vec![2, 3]);
    assert!(store.current().is_none());
}

#[tokio::test]
async fn test_interrupted_job_resumes_after_last_checkpoint() {
    let server = FakeServer::new(vec![
        record("A", "IA", 50.0),
        record("B", "IB", 50.0),
        record("C", "IC", 50.0),
    ]);
    let store = MemoryStore::default();
    // Initial list and IA's checkpoint persist; IB's does not.
    store.fail_after_saves(2);

    let first = JobDriver::new(&server, &store, plan(20, false))
        .run(&SilentReporter)
        .await;
    assert!(matches!(first, Err(Error::Checkpoint { .. })));
    assert_eq!(rebuilt_indexes(&server), vec!["IA", "IB"]);
    assert_eq!(store.current().unwrap().next_index, 1);

    store.allow_saves();
    let report = JobDriver::new(&server, &store, plan(20, false))
        .run(&SilentReporter)
        .await
        .unwrap();

    assert_eq!(server.scans(), 1);
    assert_eq!(rebuilt_indexes(&server), vec!["IA", "IB", "IB", "IC"]);
    assert_eq!(report.resumed_from, Some(1));
    let order: Vec<&str> = report
        .outcomes
        .iter()
        .map(|o| o.candidate.index_name.as_str())
        .collect();
    assert_eq!(order, vec!["IA", "IB", "IC"]);
}

#[tokio::test]
async fn test_checkpoint_for_other_job_is_refused() {
    let server = FakeServer::new(sample_records());
    let checkpoint = Checkpoint::new(
        job_key(30, None),
        vec![RebuildCandidate::new("dbo", "T3", "I3")],
    );
    let store = MemoryStore::with(checkpoint);

    let result = JobDriver::new(&server, &store, plan(20, false))
        .run(&SilentReporter)
        .await;

    assert!(matches!(result, Err(Error::CheckpointMismatch { .. })));
    assert_eq!(server.scans(), 0);
    assert!(server.executed().is_empty());
    assert!(store.current().is_some());
}

#[tokio::test]
async fn test_checkpoint_for_other_port_is_refused() {
    let server = FakeServer::new(sample_records());
    let mut other_instance = job_key(20, None);
    other_instance.port = 14330;
    let checkpoint = Checkpoint::new(
        other_instance,
        vec![RebuildCandidate::new("dbo", "T3", "I3")],
    );
    let store = MemoryStore::with(checkpoint);

    let result = JobDriver::new(&server, &store, plan(20, false))
        .run(&SilentReporter)
        .await;

    match result {
        Err(Error::CheckpointMismatch { expected, found }) => {
            assert!(expected.contains(":1433/"), "{}", expected);
            assert!(found.contains(":14330/"), "{}", found);
        }
        other => panic!("expected checkpoint mismatch, got {:?}", other),
    }
    assert_eq!(server.scans(), 0);
    assert!(server.executed().is_empty());
}

#[tokio::test]
async fn test_scan_failure_aborts_before_any_rebuild() {
    let server = FakeServer::new(sample_records());
    server.fail_scan(229);
    let store = MemoryStore::default();

    let result = JobDriver::new(&server, &store, plan(20, false))
        .run(&SilentReporter)
        .await;

    assert!(matches!(result, Err(Error::Scan(_))));
    assert!(server.executed().is_empty());
    assert!(store.saves().is_empty());
}

#[tokio::test]
async fn test_scan_connection_failure_is_fatal() {
    let server = FakeServer::new(sample_records());
    server.limit_connections(0);
    let store = MemoryStore::default();

    let result = JobDriver::new(&server, &store, plan(20, false))
        .run(&SilentReporter)
        .await;

    assert!(matches!(result, Err(Error::Connection(_))));
}

#[tokio::test]
async fn test_rebuild_connection_failure_is_per_candidate() {
    let server = FakeServer::new(sample_records());
    // Scan and the first rebuild connect; the second rebuild cannot.
    server.limit_connections(2);
    let store = MemoryStore::default();

    let report = JobDriver::new(&server, &store, plan(20, false))
        .run(&SilentReporter)
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 1);
    assert!(report.outcomes[1]
        .error
        .as_deref()
        .unwrap()
        .contains("connection refused"));
}

#[tokio::test]
async fn test_nothing_to_do() {
    let server = FakeServer::new(sample_records());
    let store = MemoryStore::default();

    let report = JobDriver::new(&server, &store, plan(90, false))
        .run(&SilentReporter)
        .await
        .unwrap();

    assert_eq!(report.total(), 0);
    assert!(store.saves().is_empty());
    assert!(server.executed().is_empty());
}

#[tokio::test]
async fn test_file_checkpoint_resume_and_cleanup() {
    let dir = tempdir().unwrap();
    let store = FileCheckpointStore::new(dir.path().join("job.checkpoint.json"));

    let candidates = vec![
        RebuildCandidate::new("dbo", "T1", "I1"),
        RebuildCandidate::new("dbo", "T3", "I3"),
    ];
    let mut checkpoint = Checkpoint::new(job_key(20, None), candidates);
    checkpoint.record(done(&checkpoint.candidates[0].clone()));
    store.save(&checkpoint).unwrap();

    let server = FakeServer::new(sample_records());
    let report = JobDriver::new(&server, &store, plan(20, false))
        .run(&SilentReporter)
        .await
        .unwrap();

    assert_eq!(rebuilt_indexes(&server), vec!["I3"]);
    assert_eq!(report.total(), 2);
    assert!(!store.path().exists());
}
