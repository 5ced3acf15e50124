//! Integration tests for the orchestrator, against the in-memory backend.
//!
//! Some tests pump by hand with `backend.pump_events()` to control exactly
//! when completions land; the rest run the real event pump.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use matchforge_backend::{MemoryBackend, Operation, ResultCode, SessionBackend};
use matchforge_pump::{PumpConfig, PumpHandle, spawn_event_pump};
use matchforge_session::{
    Completion, FailureReason, Orchestrator, OrchestratorConfig, Session, SessionError,
    SessionState,
};
use tokio_util::sync::CancellationToken;

// =========================================================================
// Helpers
// =========================================================================

const BUCKET: &str = "sbmm_default_bucket";

fn orchestrator_with(backend: MemoryBackend) -> Arc<Orchestrator<MemoryBackend>> {
    Arc::new(Orchestrator::new(
        Arc::new(backend),
        OrchestratorConfig::default(),
    ))
}

fn orchestrator() -> Arc<Orchestrator<MemoryBackend>> {
    orchestrator_with(MemoryBackend::new())
}

fn spawn_pump(orch: &Orchestrator<MemoryBackend>, rate_hz: u32) -> PumpHandle {
    spawn_event_pump(
        Arc::clone(orch.backend()),
        PumpConfig::with_rate(rate_hz),
        CancellationToken::new(),
    )
}

/// Waits for a completion, failing the test if the pump never delivers it.
async fn settle(completion: Completion) -> ResultCode {
    tokio::time::timeout(Duration::from_secs(5), completion)
        .await
        .expect("completion delivered in time")
        .expect("callback fired")
}

fn state_of(orch: &Orchestrator<MemoryBackend>, name: &str) -> SessionState {
    orch.session(name).expect("session tracked").state
}

// =========================================================================
// create_session()
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_create_match_becomes_active_once_pumped() {
    let orch = orchestrator();
    let pump = spawn_pump(&orch, 250);

    let accepted = orch.create_session("match_p1_p2", BUCKET, 2).unwrap();
    assert_eq!(accepted.value, "match_p1_p2");

    assert_eq!(settle(accepted.completion).await, ResultCode::Success);

    let session = orch.session("match_p1_p2").unwrap();
    assert_eq!(session.state, SessionState::Active);
    assert_eq!(session.last_result, None);
    assert_eq!(session.bucket_id, BUCKET);
    assert_eq!(session.max_players, 2);

    let remote = orch.backend().remote_session("match_p1_p2").unwrap();
    assert_eq!(remote.bucket_id, BUCKET);
    assert_eq!(orch.backend().counters().outstanding(), 0);

    pump.shutdown().await.unwrap();
}

#[test]
fn test_create_bucket_failure_releases_handle_once() {
    let orch = orchestrator();
    orch.backend()
        .fail_next(Operation::SetBucketId, ResultCode::InvalidParameters);

    let err = orch.create_session("match_p1_p2", BUCKET, 2).unwrap_err();

    assert!(matches!(
        err,
        SessionError::Backend { operation: Operation::SetBucketId, .. }
    ));
    let counters = orch.backend().counters();
    assert_eq!(counters.acquired, 1);
    assert_eq!(counters.released, 1);
    assert_eq!(counters.consumed, 0);
    assert!(orch.session("match_p1_p2").is_none());
    assert_eq!(orch.backend().pending_events(), 0);
}

#[test]
fn test_create_begin_failure_registers_nothing() {
    let orch = orchestrator();
    orch.backend()
        .fail_next(Operation::BeginModification, ResultCode::Other(12));

    let err = orch.create_session("m", BUCKET, 2).unwrap_err();

    assert_eq!(
        err.backend_error().and_then(|e| e.code()),
        Some(ResultCode::Other(12))
    );
    assert!(orch.sessions().is_empty());
    assert_eq!(orch.backend().counters().acquired, 0);
}

#[test]
fn test_create_out_of_sync_stays_pending_commit() {
    let orch = orchestrator();
    orch.backend()
        .script_completion(Operation::Commit, ResultCode::OutOfSync);

    let _ = orch.create_session("m", BUCKET, 2).unwrap();
    orch.backend().pump_events().unwrap();

    let session = orch.session("m").unwrap();
    assert_eq!(session.state, SessionState::PendingCommit);
    assert_eq!(session.last_result, Some(ResultCode::OutOfSync));
}

#[test]
fn test_create_dropped_completion_still_recorded() {
    let orch = orchestrator();

    let name = orch.create_session("m", BUCKET, 2).unwrap().into_value();
    orch.backend().pump_events().unwrap();

    assert_eq!(state_of(&orch, &name), SessionState::Active);
}

#[test]
fn test_create_same_name_twice_keeps_outcomes_apart() {
    let orch = orchestrator();

    let _ = orch.create_session("m", BUCKET, 2).unwrap();
    let _ = orch.create_session("m", BUCKET, 2).unwrap();
    let second = orch.session("m").unwrap().instance;

    // First commit wins on the backend; the second conflicts. Only the
    // second instance's outcome may land on the record.
    orch.backend().pump_events().unwrap();

    let session = orch.session("m").unwrap();
    assert_eq!(session.instance, second);
    assert_eq!(
        session.state,
        SessionState::Failed(FailureReason::Backend(ResultCode::ALREADY_EXISTS))
    );
    assert_eq!(session.last_result, Some(ResultCode::ALREADY_EXISTS));
    assert_eq!(orch.backend().counters().outstanding(), 0);
}

// =========================================================================
// start_session()
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_start_ghost_reports_not_found_without_record() {
    let orch = orchestrator();
    let pump = spawn_pump(&orch, 250);

    let accepted = orch.start_session("ghost").unwrap();

    assert_eq!(settle(accepted.completion).await, ResultCode::NotFound);
    assert!(orch.session("ghost").is_none());
    assert!(orch.sessions().is_empty());

    pump.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_start_active_session_marks_started() {
    let orch = orchestrator();
    let pump = spawn_pump(&orch, 250);

    let created = orch.create_session("m", BUCKET, 2).unwrap();
    settle(created.completion).await;
    let started = orch.start_session("m").unwrap();

    assert_eq!(settle(started.completion).await, ResultCode::Success);
    let session = orch.session("m").unwrap();
    assert!(session.started);
    assert_eq!(session.state, SessionState::Active);
    assert!(orch.backend().remote_session("m").unwrap().started);

    pump.shutdown().await.unwrap();
}

#[test]
fn test_start_failure_code_fails_session() {
    let orch = orchestrator();
    let _ = orch.create_session("m", BUCKET, 2).unwrap();
    orch.backend().pump_events().unwrap();
    orch.backend()
        .script_completion(Operation::Start, ResultCode::Other(40));

    let _ = orch.start_session("m").unwrap();
    orch.backend().pump_events().unwrap();

    assert_eq!(
        state_of(&orch, "m"),
        SessionState::Failed(FailureReason::Backend(ResultCode::Other(40)))
    );
}

#[test]
fn test_start_uninitialized_backend_is_error() {
    let orch = orchestrator_with(MemoryBackend::uninitialized());

    let err = orch.start_session("m").unwrap_err();

    assert!(matches!(
        err,
        SessionError::Backend { operation: Operation::Start, .. }
    ));
}

// =========================================================================
// destroy_session()
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_destroy_unknown_name_is_accepted_noop() {
    let orch = orchestrator();
    let pump = spawn_pump(&orch, 250);

    let accepted = orch.destroy_session("nobody").unwrap();

    assert_eq!(settle(accepted.completion).await, ResultCode::NotFound);
    assert!(orch.sessions().is_empty());

    pump.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_destroy_twice_is_harmless() {
    let orch = orchestrator();
    let pump = spawn_pump(&orch, 250);

    let created = orch.create_session("m", BUCKET, 2).unwrap();
    settle(created.completion).await;

    let first = orch.destroy_session("m").unwrap();
    assert_eq!(settle(first.completion).await, ResultCode::Success);
    assert!(orch.session("m").is_none());

    let second = orch.destroy_session("m").unwrap();
    assert_eq!(settle(second.completion).await, ResultCode::NotFound);
    assert!(orch.sessions().is_empty());
    assert_eq!(orch.backend().remote_session_count(), 0);

    pump.shutdown().await.unwrap();
}

#[test]
fn test_destroy_failure_stays_pending_destroy() {
    let orch = orchestrator();
    let _ = orch.create_session("m", BUCKET, 2).unwrap();
    orch.backend().pump_events().unwrap();
    orch.backend()
        .script_completion(Operation::Destroy, ResultCode::Other(8));

    let _ = orch.destroy_session("m").unwrap();
    assert_eq!(state_of(&orch, "m"), SessionState::PendingDestroy);
    orch.backend().pump_events().unwrap();

    let session = orch.session("m").unwrap();
    assert_eq!(session.state, SessionState::PendingDestroy);
    assert_eq!(session.last_result, Some(ResultCode::Other(8)));
}

#[test]
fn test_name_reusable_after_destroy() {
    let orch = orchestrator();
    let _ = orch.create_session("m", BUCKET, 2).unwrap();
    orch.backend().pump_events().unwrap();
    let first = orch.session("m").unwrap().instance;
    let _ = orch.destroy_session("m").unwrap();
    orch.backend().pump_events().unwrap();

    let _ = orch.create_session("m", BUCKET, 2).unwrap();
    orch.backend().pump_events().unwrap();

    let session = orch.session("m").unwrap();
    assert_ne!(session.instance, first);
    assert_eq!(session.state, SessionState::Active);
}

// =========================================================================
// sweep_stale()
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_sweep_times_out_unconfirmed_commit() {
    // No pump: the commit completion never arrives.
    let orch = orchestrator();
    let _ = orch.create_session("m", BUCKET, 2).unwrap();

    assert!(orch.sweep_stale().is_empty());

    tokio::time::advance(orch.config().commit_timeout + Duration::from_secs(1)).await;
    let report = orch.sweep_stale();

    assert_eq!(report.timed_out, ["m"]);
    assert_eq!(
        state_of(&orch, "m"),
        SessionState::Failed(FailureReason::TimedOut)
    );

    tokio::time::advance(orch.config().failed_retention).await;
    let report = orch.sweep_stale();
    assert_eq!(report.purged, ["m"]);
    assert!(orch.sessions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_commit_confirmed_after_timeout_destroys_remote_session() {
    let orch = orchestrator();
    let created = orch.create_session("m", BUCKET, 2).unwrap();
    tokio::time::advance(orch.config().commit_timeout).await;
    assert_eq!(orch.sweep_stale().timed_out, ["m"]);

    // The late commit creates the remote session and queues its destroy.
    orch.backend().pump_events().unwrap();
    assert_eq!(created.completion.await, Some(ResultCode::Success));
    assert!(orch.backend().remote_session("m").is_some());
    assert_eq!(orch.backend().pending_events(), 1);

    orch.backend().pump_events().unwrap();

    assert!(orch.backend().remote_session("m").is_none());
    let session = orch.session("m").unwrap();
    assert_eq!(session.state, SessionState::Failed(FailureReason::TimedOut));
    assert_eq!(session.last_result, Some(ResultCode::Success));
}

#[tokio::test(start_paused = true)]
async fn test_sweep_abandons_unconfirmed_destroy() {
    let orch = orchestrator();
    let _ = orch.create_session("m", BUCKET, 2).unwrap();
    orch.backend().pump_events().unwrap();
    let _ = orch.destroy_session("m").unwrap();

    tokio::time::advance(orch.config().destroy_timeout).await;
    let report = orch.sweep_stale();

    assert_eq!(report.abandoned, ["m"]);
    assert!(orch.session("m").is_none());
}

// =========================================================================
// Pump interaction
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_one_event_per_pump_still_makes_progress() {
    let orch = orchestrator_with(MemoryBackend::new().with_events_per_pump(1));
    let pump = spawn_pump(&orch, 100);

    let completions: Vec<_> = (0..3)
        .map(|i| {
            orch.create_session(&format!("match_{i}"), BUCKET, 2)
                .unwrap()
                .completion
        })
        .collect();
    for completion in completions {
        assert_eq!(settle(completion).await, ResultCode::Success);
    }

    assert!(orch.sessions().iter().all(|s| s.state == SessionState::Active));
    let pumps = orch.backend().pump_count();
    assert!((3..=4).contains(&pumps), "took {pumps} pumps");

    pump.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_pump_shutdown_delivers_in_flight_commit() {
    let orch = orchestrator();
    let pump = spawn_pump(&orch, 250);

    let created = orch.create_session("m", BUCKET, 2).unwrap();
    pump.shutdown().await.unwrap();

    assert_eq!(settle(created.completion).await, ResultCode::Success);
    assert_eq!(state_of(&orch, "m"), SessionState::Active);
}

/// Checks what must hold for every record at any instant, even mid-race.
fn assert_record_consistent(session: &Session, names: &[String]) {
    assert!(names.contains(&session.name), "{session:?}");
    assert_ne!(session.state, SessionState::Destroyed, "{session:?}");
    assert!(!session.started, "{session:?}");
    if let SessionState::Failed(reason) = session.state {
        // A failed commit records its code in the same update.
        assert_eq!(reason, FailureReason::Backend(ResultCode::ALREADY_EXISTS), "{session:?}");
        assert!(session.last_result.is_some(), "{session:?}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_create_destroy_pairs_stay_consistent() {
    let orch = orchestrator();
    let pump = spawn_pump(&orch, 1000);
    let names: Vec<String> = (0..4).map(|i| format!("match_{i}")).collect();

    // Samples the registry while the workers race.
    let racing = Arc::new(AtomicBool::new(true));
    let sampler = {
        let orch = Arc::clone(&orch);
        let racing = Arc::clone(&racing);
        let names = names.clone();
        tokio::spawn(async move {
            let mut sampled = 0usize;
            while racing.load(Ordering::Acquire) {
                let snapshot = orch.sessions();
                let mut seen: Vec<&str> = snapshot.iter().map(|s| s.name.as_str()).collect();
                seen.dedup();
                assert_eq!(seen.len(), snapshot.len(), "one record per name");
                for session in &snapshot {
                    assert_record_consistent(session, &names);
                }
                sampled += snapshot.len();
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            sampled
        })
    };

    let mut tasks = Vec::new();
    for worker in 0..8 {
        let orch = Arc::clone(&orch);
        tasks.push(tokio::spawn(async move {
            for round in 0..25 {
                // Workers share four names, so creates and destroys race.
                let name = format!("match_{}", (worker + round) % 4);
                if let Ok(created) = orch.create_session(&name, BUCKET, 2) {
                    settle(created.completion).await;
                }
                let destroyed = orch.destroy_session(&name).unwrap();
                settle(destroyed.completion).await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    racing.store(false, Ordering::Release);
    let sampled = sampler.await.unwrap();
    assert!(sampled > 0, "sampler never saw a record");

    // One last create per name, uncontended, leaves records to inspect.
    let mut outcomes = Vec::new();
    for name in &names {
        let created = orch.create_session(name, BUCKET, 2).unwrap();
        outcomes.push((name.clone(), settle(created.completion).await));
    }

    assert_eq!(orch.backend().pending_events(), 0);
    let counters = orch.backend().counters();
    assert_eq!(counters.outstanding(), 0);
    assert_eq!(counters.acquired, counters.consumed + counters.released);

    let records = orch.sessions();
    assert_eq!(records.len(), names.len());
    let mut instances: Vec<_> = records.iter().map(|s| s.instance).collect();
    instances.sort();
    instances.dedup();
    assert_eq!(instances.len(), records.len(), "instances are unique");

    for (session, (name, code)) in records.iter().zip(&outcomes) {
        assert_eq!(&session.name, name);
        assert_record_consistent(session, &names);
        // A remote session left by a stale race-time commit makes the
        // final commit collide; otherwise it succeeds.
        assert!(orch.backend().remote_session(name).is_some(), "{session:?}");
        match code {
            ResultCode::Success => {
                assert_eq!(session.state, SessionState::Active, "{session:?}");
                assert_eq!(session.last_result, None, "{session:?}");
            }
            other => {
                assert_eq!(
                    session.state,
                    SessionState::Failed(FailureReason::Backend(*other)),
                    "{session:?}"
                );
                assert_eq!(session.last_result, Some(*other), "{session:?}");
            }
        }
    }

    pump.shutdown().await.unwrap();
}
