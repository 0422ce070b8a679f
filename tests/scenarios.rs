//! End-to-end HTTP scenarios driving the full router with a loopback
//! migrator double, in place of an external process making real outbound
//! calls. Each test exercises one lifecycle scenario.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use loom::domain::{instance_id, Candidate};
use loom::engine::{ExecutionEngine, LocalEngine};
use loom::http_server::{router, AppState};
use loom::notifier::{DispatchStepRequest, DryRunResult, DryRunner, MigratorNotifier, NotifierResult};
use loom::service::Service;
use loom::store::{InMemoryStore, Store};

/// Records every dispatch request instead of making a real HTTP call, so
/// assertions can inspect exactly what the engine would have sent a
/// migrator.
#[derive(Default)]
struct LoopbackNotifier {
    dispatches: Mutex<Vec<DispatchStepRequest>>,
}

#[async_trait]
impl MigratorNotifier for LoopbackNotifier {
    async fn dispatch(&self, req: &DispatchStepRequest) -> NotifierResult<()> {
        self.dispatches.lock().unwrap().push(req.clone());
        Ok(())
    }
}

#[async_trait]
impl DryRunner for LoopbackNotifier {
    async fn dry_run(&self, _migrator_url: &str, _candidate: &Candidate) -> NotifierResult<DryRunResult> {
        Ok(DryRunResult { steps: vec![] })
    }
}

fn test_app() -> (Router, Arc<LoopbackNotifier>) {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let notifier = Arc::new(LoopbackNotifier::default());
    let engine: Arc<dyn ExecutionEngine> = Arc::new(LocalEngine::new(store.clone(), notifier.clone(), Default::default()));
    let service = Arc::new(Service::new(store, engine, notifier.clone(), notifier.clone()));
    (router(AppState { service }), notifier)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn announce_widget_rollout(app: &Router, migration_id: &str) {
    let body = serde_json::json!({
        "id": migration_id,
        "name": "Widget rollout",
        "migratorUrl": "http://migrator.invalid",
        "steps": [
            {"name": "update", "migratorApp": "helm"},
            {"name": "verify", "migratorApp": "helm"},
        ],
        "requiredInputs": [{"name": "repoName", "label": "Repository"}],
    });
    let response = app.clone().oneshot(json_request("POST", "/registry/announce", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

async fn submit_candidate(app: &Router, migration_id: &str, candidate_id: &str, metadata: Value) {
    let body = serde_json::json!([{ "id": candidate_id, "kind": "service", "metadata": metadata }]);
    let response = app
        .clone()
        .oneshot(json_request("POST", &format!("/migrations/{migration_id}/candidates"), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

/// Polls until the given dispatch count is observed or the budget of
/// attempts runs out. The supervisor runs on a spawned task, so every
/// observable effect of `start`/`raise_event` lands asynchronously.
async fn wait_for_dispatch_count(notifier: &LoopbackNotifier, count: usize) {
    for _ in 0..200 {
        if notifier.dispatches.lock().unwrap().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {count} dispatch(es), saw {}", notifier.dispatches.lock().unwrap().len());
}

async fn candidate_status(app: &Router, migration_id: &str, candidate_id: &str) -> String {
    let response = app
        .clone()
        .oneshot(get_request(&format!("/migrations/{migration_id}/candidates/{candidate_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await["status"].as_str().unwrap().to_string()
}

/// Scenario A: a single-step run dispatches once, the migrator reports
/// success, and the candidate lands `completed`.
#[tokio::test]
async fn happy_path_single_candidate_completes() {
    let (app, notifier) = test_app();
    announce_widget_rollout(&app, "m1").await;
    submit_candidate(&app, "m1", "c1", serde_json::json!({})).await;

    let start_body = serde_json::json!({"inputs": {"repoName": "acme/widget"}});
    let response = app
        .clone()
        .oneshot(json_request("POST", "/migrations/m1/candidates/c1/start", start_body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    wait_for_dispatch_count(&notifier, 1).await;
    let instance = instance_id("m1", "c1");

    for step in ["update", "verify"] {
        let event_body = serde_json::json!({"stepName": step, "candidateId": "c1", "status": "succeeded"});
        let response = app
            .clone()
            .oneshot(json_request("POST", &format!("/event/{instance}"), event_body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        if step == "update" {
            wait_for_dispatch_count(&notifier, 2).await;
        }
    }

    for _ in 0..200 {
        if candidate_status(&app, "m1", "c1").await == "completed" {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("candidate never reached completed status");
}

/// Scenario B: a failed step is only retried after an explicit
/// `retry-step`, and the retry re-dispatches the same step.
#[tokio::test]
async fn failed_step_only_retries_on_explicit_request() {
    let (app, notifier) = test_app();
    announce_widget_rollout(&app, "m1").await;
    submit_candidate(&app, "m1", "c1", serde_json::json!({})).await;

    let start_body = serde_json::json!({"inputs": {"repoName": "acme/widget"}});
    app.clone()
        .oneshot(json_request("POST", "/migrations/m1/candidates/c1/start", start_body))
        .await
        .unwrap();
    wait_for_dispatch_count(&notifier, 1).await;

    let instance = instance_id("m1", "c1");
    let failed_body = serde_json::json!({"stepName": "update", "candidateId": "c1", "status": "failed"});
    let response = app
        .clone()
        .oneshot(json_request("POST", &format!("/event/{instance}"), failed_body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // No automatic re-dispatch before the operator asks for one.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(notifier.dispatches.lock().unwrap().len(), 1);

    let retry_body = serde_json::json!({"stepName": "update"});
    let response = app
        .clone()
        .oneshot(json_request("POST", "/migrations/m1/candidates/c1/retry-step", retry_body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    wait_for_dispatch_count(&notifier, 2).await;
    let dispatches = notifier.dispatches.lock().unwrap();
    assert_eq!(dispatches[1].step_name, "update");
}

/// Scenario C: updating inputs on a running candidate is reflected in the
/// next step's dispatch payload.
#[tokio::test]
async fn update_inputs_while_running_reaches_next_dispatch() {
    let (app, notifier) = test_app();
    announce_widget_rollout(&app, "m1").await;
    submit_candidate(&app, "m1", "c1", serde_json::json!({})).await;

    let start_body = serde_json::json!({"inputs": {"repoName": "acme/widget"}});
    app.clone()
        .oneshot(json_request("POST", "/migrations/m1/candidates/c1/start", start_body))
        .await
        .unwrap();
    wait_for_dispatch_count(&notifier, 1).await;

    let update_body = serde_json::json!({"repoName": "acme/widget-renamed"});
    let response = app
        .clone()
        .oneshot(json_request("PATCH", "/migrations/m1/candidates/c1/inputs", update_body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let instance = instance_id("m1", "c1");
    let event_body = serde_json::json!({"stepName": "update", "candidateId": "c1", "status": "succeeded"});
    app.clone()
        .oneshot(json_request("POST", &format!("/event/{instance}"), event_body))
        .await
        .unwrap();

    wait_for_dispatch_count(&notifier, 2).await;
    let dispatches = notifier.dispatches.lock().unwrap();
    assert_eq!(dispatches[1].candidate.metadata.get("repoName").map(String::as_str), Some("acme/widget-renamed"));
}

/// Scenario D: cancelling a running candidate reverts its status to
/// `not_started` and stops further dispatch.
#[tokio::test]
async fn cancel_mid_step_reverts_candidate_status() {
    let (app, notifier) = test_app();
    announce_widget_rollout(&app, "m1").await;
    submit_candidate(&app, "m1", "c1", serde_json::json!({})).await;

    let start_body = serde_json::json!({"inputs": {"repoName": "acme/widget"}});
    app.clone()
        .oneshot(json_request("POST", "/migrations/m1/candidates/c1/start", start_body))
        .await
        .unwrap();
    wait_for_dispatch_count(&notifier, 1).await;

    let response = app
        .clone()
        .oneshot(Request::builder().method("POST").uri("/migrations/m1/candidates/c1/cancel").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    for _ in 0..200 {
        if candidate_status(&app, "m1", "c1").await == "not_started" {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("candidate never reverted to not_started after cancel");
}

/// Scenario E: re-submitting a candidate already tracked (not running)
/// merges metadata with the existing values winning per key.
#[tokio::test]
async fn rediscovery_merge_keeps_existing_metadata_on_conflict() {
    let (app, _notifier) = test_app();
    announce_widget_rollout(&app, "m1").await;
    submit_candidate(&app, "m1", "c1", serde_json::json!({"team": "platform", "owner": "alice"})).await;
    submit_candidate(&app, "m1", "c1", serde_json::json!({"team": "discovered-team", "region": "us-east"})).await;

    let response = app.clone().oneshot(get_request("/migrations/m1/candidates/c1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let candidate = body_json(response).await;
    assert_eq!(candidate["metadata"]["team"], "platform");
    assert_eq!(candidate["metadata"]["owner"], "alice");
    assert_eq!(candidate["metadata"]["region"], "us-east");
}

/// Scenario F: starting a run with an input key the migration never
/// declared is rejected before anything is dispatched.
#[tokio::test]
async fn start_with_unknown_input_key_is_rejected() {
    let (app, notifier) = test_app();
    announce_widget_rollout(&app, "m1").await;
    submit_candidate(&app, "m1", "c1", serde_json::json!({})).await;

    let start_body = serde_json::json!({"inputs": {"bogus": "x"}});
    let response = app
        .clone()
        .oneshot(json_request("POST", "/migrations/m1/candidates/c1/start", start_body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(notifier.dispatches.lock().unwrap().len(), 0);
    assert_eq!(candidate_status(&app, "m1", "c1").await, "not_started");
}

/// Deleting a migration while a candidate is still running is refused.
#[tokio::test]
async fn delete_migration_refuses_while_candidate_running() {
    let (app, notifier) = test_app();
    announce_widget_rollout(&app, "m1").await;
    submit_candidate(&app, "m1", "c1", serde_json::json!({})).await;

    let start_body = serde_json::json!({"inputs": {"repoName": "acme/widget"}});
    app.clone()
        .oneshot(json_request("POST", "/migrations/m1/candidates/c1/start", start_body))
        .await
        .unwrap();
    wait_for_dispatch_count(&notifier, 1).await;

    let response = app
        .clone()
        .oneshot(Request::builder().method("DELETE").uri("/migrations/m1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}
