//! Supervisor Lifecycle Integration Tests
//!
//! Drives `StubSupervisor` through ensure / stop / stop-all / reuse using a
//! fake launcher that serves the mock service protocol in-process.
//!
//! Uses tempfile for isolation - every test gets its own pid directory

mod common;

use common::{test_config, FakeLauncher};
use pact_harness::{HarnessError, StopOutcome, StubKey, StubState, StubSupervisor};
use std::sync::Arc;
use tempfile::TempDir;

fn supervisor(temp: &TempDir, launcher: &Arc<FakeLauncher>) -> StubSupervisor {
    StubSupervisor::with_launcher(test_config(temp.path()), launcher.clone()).unwrap()
}

#[tokio::test]
async fn test_ensure_running_twice_spawns_once() {
    let temp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    let supervisor = supervisor(&temp, &launcher);

    let first = supervisor.ensure_running("serviceA", "harness").await.unwrap();
    let second = supervisor.ensure_running("serviceA", "harness").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(launcher.launches(), 1);
    assert_eq!(supervisor.state("serviceA", "harness"), StubState::Running);
    assert!(first.starts_with("http://127.0.0.1:"));
}

#[tokio::test]
async fn test_healthy_stub_is_persisted() {
    let temp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    let supervisor = supervisor(&temp, &launcher);

    let url = supervisor.ensure_running("serviceA", "harness").await.unwrap();

    let record = supervisor
        .identity()
        .read_record(&StubKey::new("serviceA", "harness"))
        .unwrap()
        .expect("identity file written after health check");
    assert_eq!(record.base_url, url);
    assert_eq!(record.pid, launcher.last().pid);
}

#[tokio::test]
async fn test_stop_removes_record_and_next_ensure_spawns_new_pid() {
    let temp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    let supervisor = supervisor(&temp, &launcher);
    let key = StubKey::new("serviceA", "harness");

    supervisor.ensure_running("serviceA", "harness").await.unwrap();
    let first_pid = launcher.last().pid;

    let outcome = supervisor.stop("serviceA", "harness").await.unwrap();

    assert_eq!(outcome, StopOutcome::Graceful);
    assert_eq!(supervisor.state("serviceA", "harness"), StubState::Absent);
    assert!(!supervisor.identity().path_for(&key).exists());

    supervisor.ensure_running("serviceA", "harness").await.unwrap();
    assert_eq!(launcher.launches(), 2);
    assert_ne!(launcher.last().pid, first_pid);
}

#[tokio::test]
async fn test_stub_is_reused_by_a_new_process() {
    let temp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    let supervisor = supervisor(&temp, &launcher);

    let url = supervisor.ensure_running("serviceA", "harness").await.unwrap();

    // Simulate the next test process
    supervisor.reset_registry();
    assert_eq!(supervisor.state("serviceA", "harness"), StubState::Absent);

    let reused = supervisor.ensure_running("serviceA", "harness").await.unwrap();

    assert_eq!(reused, url);
    assert_eq!(launcher.launches(), 1);
}

#[tokio::test]
async fn test_crashed_stub_is_replaced() {
    let temp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    let supervisor = supervisor(&temp, &launcher);

    supervisor.ensure_running("serviceA", "harness").await.unwrap();
    let crashed = launcher.last();
    crashed.crash_and_wait().await;

    supervisor.reset_registry();
    supervisor.ensure_running("serviceA", "harness").await.unwrap();

    assert_eq!(launcher.launches(), 2);
    assert_ne!(launcher.last().pid, crashed.pid);

    let record = supervisor
        .identity()
        .read_record(&StubKey::new("serviceA", "harness"))
        .unwrap()
        .unwrap();
    assert_eq!(record.pid, launcher.last().pid);
}

#[tokio::test]
async fn test_stop_escalates_to_kill() {
    let temp = TempDir::new().unwrap();
    let launcher = FakeLauncher::stubborn();
    let supervisor = supervisor(&temp, &launcher);

    supervisor.ensure_running("serviceA", "harness").await.unwrap();
    let outcome = supervisor.stop("serviceA", "harness").await.unwrap();

    assert_eq!(outcome, StopOutcome::Escalated);
    let process = launcher.last();
    assert_eq!(process.terms.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(process.kills.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(supervisor.state("serviceA", "harness"), StubState::Absent);
}

#[tokio::test]
async fn test_stop_adopts_stub_started_by_earlier_process() {
    let temp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    let supervisor = supervisor(&temp, &launcher);

    supervisor.ensure_running("serviceA", "harness").await.unwrap();
    supervisor.reset_registry();

    let outcome = supervisor.stop("serviceA", "harness").await.unwrap();

    assert_eq!(outcome, StopOutcome::Graceful);
    assert!(launcher.last().has_exited());
    assert!(supervisor.identity().list().unwrap().is_empty());
}

#[tokio::test]
async fn test_stop_all_on_empty_registry_is_noop() {
    let temp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    let supervisor = supervisor(&temp, &launcher);

    let stopped = supervisor.stop_all().await.unwrap();
    assert!(stopped.is_empty());
}

#[tokio::test]
async fn test_stop_all_stops_every_stub() {
    let temp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    let supervisor = supervisor(&temp, &launcher);

    supervisor.ensure_running("providerX", "consumer").await.unwrap();
    supervisor.ensure_running("providerY", "consumer").await.unwrap();

    let stopped = supervisor.stop_all().await.unwrap();

    let keys: Vec<String> = stopped.iter().map(|(k, _)| k.to_string()).collect();
    assert_eq!(keys, vec!["providerX/consumer", "providerY/consumer"]);
    assert!(supervisor.running().is_empty());
    assert!(supervisor.identity().list().unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_ensure_for_different_pairs() {
    let temp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    let supervisor = supervisor(&temp, &launcher);

    let (x, y) = tokio::join!(
        supervisor.ensure_running("providerX", "consumer"),
        supervisor.ensure_running("providerY", "consumer"),
    );
    let (x, y) = (x.unwrap(), y.unwrap());

    assert_ne!(x, y);
    assert_eq!(launcher.launches(), 2);
    assert_eq!(supervisor.running().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ensure_for_same_pair_spawns_once() {
    let temp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    let supervisor = Arc::new(supervisor(&temp, &launcher));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let supervisor = supervisor.clone();
            tokio::spawn(async move { supervisor.ensure_running("serviceA", "harness").await })
        })
        .collect();

    let mut urls = Vec::new();
    for handle in handles {
        urls.push(handle.await.unwrap().unwrap());
    }

    urls.dedup();
    assert_eq!(urls.len(), 1);
    assert_eq!(launcher.launches(), 1);
}

#[tokio::test]
async fn test_restart_replaces_process() {
    let temp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    let supervisor = supervisor(&temp, &launcher);

    let before = supervisor.ensure_running("serviceA", "harness").await.unwrap();
    let first = launcher.last();

    let after = supervisor.restart("serviceA", "harness").await.unwrap();

    // the port assignment survives the restart
    assert_eq!(before, after);
    assert!(first.has_exited());
    assert_eq!(launcher.launches(), 2);
}

#[tokio::test]
async fn test_adopt_persisted_collects_live_stubs() {
    let temp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    let supervisor = supervisor(&temp, &launcher);

    supervisor.ensure_running("providerX", "consumer").await.unwrap();
    supervisor.ensure_running("providerY", "consumer").await.unwrap();
    launcher.process(50_001).unwrap().crash_and_wait().await;
    supervisor.reset_registry();

    let adopted = supervisor.adopt_persisted().await.unwrap();

    assert_eq!(adopted.len(), 1);
    assert_eq!(adopted[0].provider(), "providerX");
    assert_eq!(supervisor.identity().list().unwrap().len(), 1);
}

#[tokio::test]
async fn test_verification_failure_names_provider_log() {
    let temp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    let supervisor = supervisor(&temp, &launcher);
    let url = supervisor.ensure_running("serviceA", "harness").await.unwrap();

    supervisor
        .client()
        .add_interaction(
            &url,
            &serde_json::json!({
                "description": "get test",
                "request": {"method": "GET", "path": "/v1/test"},
                "response": {"status": 200}
            }),
        )
        .await
        .unwrap();

    let policy = supervisor.config().verification;
    let err = supervisor
        .verify_interactions("serviceA", "harness", policy)
        .await
        .unwrap_err();

    match err {
        HarnessError::VerificationExhausted {
            provider,
            attempts,
            details,
            log_file,
            ..
        } => {
            assert_eq!(provider, "serviceA");
            assert_eq!(attempts, policy.max_attempts);
            assert!(details.contains("GET /v1/test"));
            assert!(log_file.ends_with("pact/logs/pact-serviceA.log"));
        }
        other => panic!("Expected VerificationExhausted, got {:?}", other),
    }
}

#[tokio::test]
async fn test_hyphenated_pairs_never_share_a_stub() {
    let temp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    let supervisor = supervisor(&temp, &launcher);
    let left = StubKey::new("a-b", "c");

    let left_url = supervisor.ensure_running("a-b", "c").await.unwrap();
    let left_pid = launcher.last().pid;

    // Next test process asks for the pair whose naive file name collides
    supervisor.reset_registry();
    let right_url = supervisor.ensure_running("a", "b-c").await.unwrap();

    assert_ne!(left_url, right_url);
    assert_eq!(launcher.launches(), 2);
    assert_eq!(supervisor.running().len(), 1);
    assert_eq!(supervisor.running()[0].key(), &StubKey::new("a", "b-c"));

    let outcome = supervisor.stop("a", "b-c").await.unwrap();
    assert_eq!(outcome, StopOutcome::Graceful);

    // The other pair's stub and identity are untouched
    assert!(!launcher.process(left_pid).unwrap().has_exited());
    let record = supervisor.identity().read_record(&left).unwrap().unwrap();
    assert_eq!(record.pid, left_pid);
    assert_eq!(record.base_url, left_url);
}
