//! Harness Flow Integration Tests
//!
//! Contract-driven flows of `PactHarness` against fake mock services:
//! serve, run the test body, verify, clean up.

mod common;

use common::{test_config, write_contract, FakeLauncher};
use pact_harness::{env_key, HarnessConfig, HarnessError, PactHarness, StubKey, StubState, StubSupervisor};
use serial_test::serial;
use std::sync::Arc;
use tempfile::TempDir;

fn supervisor_with(config: HarnessConfig, launcher: &Arc<FakeLauncher>) -> StubSupervisor {
    StubSupervisor::with_launcher(config, launcher.clone()).unwrap()
}

async fn call(url: &str, path: &str) -> u16 {
    reqwest::get(format!("{}{}", url, path))
        .await
        .unwrap()
        .status()
        .as_u16()
}

#[tokio::test]
async fn test_run_integration_test_passes_when_interactions_exercised() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    write_contract(&config, "serviceA-harness", "serviceA", "harness", &["/v1/test"]);
    let launcher = FakeLauncher::new();
    let supervisor = supervisor_with(config, &launcher);
    let harness = PactHarness::new(&supervisor);

    let assigned = harness.preassign_ports(&["serviceA-harness"]).await.unwrap();
    let url = assigned[0].1.clone();

    let status = harness
        .run_integration_test(&["serviceA-harness"], || call(&url, "/v1/test"), None)
        .await
        .unwrap();

    assert_eq!(status, 200);
    assert_eq!(launcher.launches(), 1);
    assert_eq!(supervisor.base_url("serviceA", "harness"), Some(url));
}

#[tokio::test]
async fn test_run_integration_test_fails_when_interaction_missed() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    write_contract(&config, "serviceA-harness", "serviceA", "harness", &["/v1/test"]);
    let launcher = FakeLauncher::new();
    let supervisor = supervisor_with(config, &launcher);
    let harness = PactHarness::new(&supervisor);

    let err = harness
        .run_integration_test(&["serviceA-harness"], || async {}, None)
        .await
        .unwrap_err();

    match err {
        HarnessError::VerificationExhausted {
            provider,
            attempts,
            details,
            ..
        } => {
            assert_eq!(provider, "serviceA");
            assert_eq!(attempts, 10);
            assert!(details.contains("GET /v1/test"), "details were: {}", details);
        }
        other => panic!("expected VerificationExhausted, got {:?}", other),
    }

    // Interactions are cleared even when verification fails
    let service = launcher.service(launcher.last().pid).unwrap();
    assert_eq!(service.registered(), 0);
}

#[tokio::test]
async fn test_only_declared_pairs_are_verified() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    write_contract(&config, "serviceA-harness", "serviceA", "harness", &["/v1/test"]);
    let launcher = FakeLauncher::new();
    let supervisor = supervisor_with(config, &launcher);
    let harness = PactHarness::new(&supervisor);

    // An unrelated stub with an interaction nobody will exercise
    let unrelated = serde_json::json!({
        "description": "get orders",
        "request": {"method": "GET", "path": "/orders"},
        "response": {"status": 200}
    });

    let url = harness.preassign_ports(&["serviceA-harness"]).await.unwrap()[0].1.clone();
    harness
        .run_integration_test(
            &["serviceA-harness"],
            || async {
                harness
                    .add_interaction("serviceB", "harness", &unrelated)
                    .await
                    .unwrap();
                call(&url, "/v1/test").await
            },
            None,
        )
        .await
        .unwrap();

    assert_eq!(supervisor.state("serviceB", "harness"), StubState::Running);
    assert!(harness.verify_all().await.is_ok());
}

#[tokio::test]
async fn test_test_with_stub_services_clears_interactions_afterwards() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    write_contract(&config, "serviceA-harness", "serviceA", "harness", &["/v1/a", "/v1/b"]);
    let launcher = FakeLauncher::new();
    let supervisor = supervisor_with(config, &launcher);
    let harness = PactHarness::new(&supervisor);

    let registered_during = harness
        .test_with_stub_services(&["serviceA-harness"], || async {
            launcher.service(launcher.last().pid).unwrap().registered()
        })
        .await
        .unwrap();

    assert_eq!(registered_during, 2);

    let service = launcher.service(launcher.last().pid).unwrap();
    assert_eq!(service.registered(), 0);
    assert_eq!(
        service.admin_calls().last().map(String::as_str),
        Some("DELETE /interactions")
    );
}

#[tokio::test]
#[serial]
async fn test_preassign_exposes_urls_without_starting_stubs() {
    let temp = TempDir::new().unwrap();
    let mut config = test_config(temp.path());
    config.expose_env = true;
    write_contract(&config, "serviceA-harness", "serviceA", "harness", &["/v1/test"]);
    let launcher = FakeLauncher::new();
    let supervisor = supervisor_with(config, &launcher);
    let harness = PactHarness::new(&supervisor);

    let first = harness.preassign_ports(&["serviceA-harness"]).await.unwrap();
    let second = harness.preassign_ports(&["serviceA-harness"]).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first[0].0, StubKey::new("serviceA", "harness"));
    assert_eq!(std::env::var(env_key("serviceA")).unwrap(), first[0].1);
    assert_eq!(launcher.launches(), 0);
    assert_eq!(supervisor.state("serviceA", "harness"), StubState::Absent);

    std::env::remove_var(env_key("serviceA"));
}

#[tokio::test]
async fn test_add_interaction_restarts_unreachable_stub() {
    let temp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    let supervisor = supervisor_with(test_config(temp.path()), &launcher);
    let harness = PactHarness::new(&supervisor);

    let first = serde_json::json!({
        "description": "get test",
        "request": {"method": "GET", "path": "/v1/test"},
        "response": {"status": 200}
    });
    let second = serde_json::json!({
        "description": "get other",
        "request": {"method": "GET", "path": "/v1/other"},
        "response": {"status": 200}
    });

    harness
        .add_interaction("serviceA", "harness", &first)
        .await
        .unwrap();
    let url = supervisor.base_url("serviceA", "harness").unwrap();
    launcher.last().crash_and_wait().await;

    harness
        .add_interaction("serviceA", "harness", &second)
        .await
        .unwrap();

    assert_eq!(launcher.launches(), 2);
    assert_eq!(supervisor.base_url("serviceA", "harness"), Some(url.clone()));
    // The interaction registered before the crash is carried over
    let service = launcher.service(launcher.last().pid).unwrap();
    assert_eq!(service.registered(), 2);
    assert_eq!(call(&url, "/v1/test").await, 200);
    assert_eq!(call(&url, "/v1/other").await, 200);
    harness.verify_all().await.unwrap();
}

#[tokio::test]
async fn test_stub_crashing_mid_contract_gets_whole_contract() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    write_contract(&config, "serviceA-harness", "serviceA", "harness", &["/v1/a", "/v1/b", "/v1/c"]);
    let launcher = FakeLauncher::crashing_after(2);
    let supervisor = supervisor_with(config, &launcher);
    let harness = PactHarness::new(&supervisor);

    harness.add_pact("serviceA-harness").await.unwrap();

    assert_eq!(launcher.launches(), 2);
    let service = launcher.service(launcher.last().pid).unwrap();
    assert_eq!(service.registered(), 3);

    let url = supervisor.base_url("serviceA", "harness").unwrap();
    for path in ["/v1/a", "/v1/b", "/v1/c"] {
        assert_eq!(call(&url, path).await, 200, "{} not served after restart", path);
    }
    harness
        .verify_interactions("serviceA", "harness", None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_reset_interactions_are_not_replayed() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    write_contract(&config, "serviceA-harness", "serviceA", "harness", &["/v1/test"]);
    let launcher = FakeLauncher::new();
    let supervisor = supervisor_with(config, &launcher);
    let harness = PactHarness::new(&supervisor);

    harness
        .test_with_stub_services(&["serviceA-harness"], || async {})
        .await
        .unwrap();
    launcher.last().crash_and_wait().await;

    let payload = serde_json::json!({
        "description": "get other",
        "request": {"method": "GET", "path": "/v1/other"},
        "response": {"status": 200}
    });
    harness
        .add_interaction("serviceA", "harness", &payload)
        .await
        .unwrap();

    assert_eq!(launcher.launches(), 2);
    assert_eq!(launcher.service(launcher.last().pid).unwrap().registered(), 1);
}

#[tokio::test]
async fn test_add_pact_and_verify_all() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    write_contract(&config, "serviceA-harness", "serviceA", "harness", &["/v1/test"]);
    let launcher = FakeLauncher::new();
    let supervisor = supervisor_with(config, &launcher);
    let harness = PactHarness::new(&supervisor);

    harness.add_pact("serviceA-harness").await.unwrap();
    assert_eq!(launcher.service(launcher.last().pid).unwrap().registered(), 1);

    let err = harness.verify_all().await.unwrap_err();
    assert!(matches!(err, HarnessError::VerificationFailed { .. }), "got {:?}", err);

    let url = supervisor.base_url("serviceA", "harness").unwrap();
    assert_eq!(call(&url, "/v1/test").await, 200);
    harness.verify_all().await.unwrap();
    harness
        .verify_interactions("serviceA", "harness", None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_add_pact_unknown_contract_is_error() {
    let temp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    let supervisor = supervisor_with(test_config(temp.path()), &launcher);
    let harness = PactHarness::new(&supervisor);

    assert!(harness.add_pact("missing").await.is_err());
    assert_eq!(launcher.launches(), 0);
}

#[tokio::test]
async fn test_teardown_respects_keep_alive() {
    let temp = TempDir::new().unwrap();
    let mut config = test_config(temp.path());
    config.keep_alive = true;
    let launcher = FakeLauncher::new();
    let supervisor = supervisor_with(config, &launcher);
    let harness = PactHarness::new(&supervisor);

    supervisor.ensure_running("serviceA", "harness").await.unwrap();

    assert!(harness.teardown().await.unwrap().is_empty());
    assert_eq!(supervisor.state("serviceA", "harness"), StubState::Running);
    assert_eq!(supervisor.identity().list().unwrap().len(), 1);
}

#[tokio::test]
async fn test_teardown_stops_everything_by_default() {
    let temp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    let supervisor = supervisor_with(test_config(temp.path()), &launcher);
    let harness = PactHarness::new(&supervisor);

    supervisor.ensure_running("serviceA", "harness").await.unwrap();
    supervisor.ensure_running("serviceB", "harness").await.unwrap();

    let stopped = harness.teardown().await.unwrap();

    assert_eq!(stopped.len(), 2);
    assert!(supervisor.running().is_empty());
    assert!(supervisor.identity().list().unwrap().is_empty());
}
