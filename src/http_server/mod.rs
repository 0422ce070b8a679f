//! # Inbound API Surface
//!
//! Thin Axum adapter over the [`Service`]: extracts and validates JSON
//! bodies/path/query params, calls the one matching use case, and maps the
//! resulting [`ServiceError`] to a JSON error body plus status code.
//! `Router` + `State` + small per-endpoint async fns, kept as one module for
//! the whole surface since the endpoint count here is modest.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::domain::{Candidate, CandidateSubmission, MigrationAnnouncement, StepStatus};
use crate::metrics;
use crate::service::{Service, ServiceError};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<Service>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/registry/announce", post(announce))
        .route("/migrations", get(list_migrations))
        .route("/migrations/{id}", get(get_migration))
        .route("/migrations/{id}", delete(delete_migration))
        .route("/migrations/{id}/candidates", post(submit_candidates))
        .route("/migrations/{id}/candidates", get(list_candidates))
        .route("/migrations/{id}/candidates/{cid}", get(get_candidate))
        .route("/migrations/{id}/candidates/{cid}/start", post(start_candidate))
        .route("/migrations/{id}/candidates/{cid}/cancel", post(cancel_candidate))
        .route("/migrations/{id}/candidates/{cid}/retry-step", post(retry_step))
        .route("/migrations/{id}/candidates/{cid}/inputs", patch(update_inputs))
        .route("/migrations/{id}/candidates/{cid}/steps", get(get_step_progress))
        .route("/migrations/{id}/dry-run", post(dry_run))
        .route("/event/{run_id}", post(record_event))
        .route("/metrics/overview", get(metrics_overview))
        .route("/metrics/steps", get(metrics_per_step))
        .route("/metrics/timeline", get(metrics_timeline))
        .route("/metrics/failures", get(metrics_failures))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

fn service_error_response(err: ServiceError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        tracing::error!(target: "loom::http", code = err.error_code(), error = %err, "service call failed");
    } else {
        tracing::warn!(target: "loom::http", code = err.error_code(), error = %err, "service call rejected");
    }
    let body = ErrorBody {
        error: err.error_code().to_string(),
        message: err.to_string(),
    };
    (status, Json(body)).into_response()
}

async fn announce(State(state): State<AppState>, Json(body): Json<MigrationAnnouncement>) -> Response {
    match state.service.announce(body).await {
        Ok(migration) => (StatusCode::OK, Json(migration)).into_response(),
        Err(e) => service_error_response(e),
    }
}

async fn list_migrations(State(state): State<AppState>) -> Response {
    match state.service.list_migrations().await {
        Ok(migrations) => (StatusCode::OK, Json(migrations)).into_response(),
        Err(e) => service_error_response(e),
    }
}

async fn get_migration(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.service.get_migration(&id).await {
        Ok(migration) => (StatusCode::OK, Json(migration)).into_response(),
        Err(e) => service_error_response(e),
    }
}

async fn delete_migration(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.service.delete_migration(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => service_error_response(e),
    }
}

async fn submit_candidates(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Vec<CandidateSubmission>>,
) -> Response {
    match state.service.submit_candidates(&id, body).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => service_error_response(e),
    }
}

async fn list_candidates(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.service.list_candidates(&id).await {
        Ok(candidates) => (StatusCode::OK, Json(candidates)).into_response(),
        Err(e) => service_error_response(e),
    }
}

async fn get_candidate(State(state): State<AppState>, Path((id, cid)): Path<(String, String)>) -> Response {
    match state.service.get_candidate(&id, &cid).await {
        Ok(candidate) => (StatusCode::OK, Json(candidate)).into_response(),
        Err(e) => service_error_response(e),
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct StartRequestBody {
    #[serde(default)]
    inputs: HashMap<String, String>,
}

async fn start_candidate(
    State(state): State<AppState>,
    Path((id, cid)): Path<(String, String)>,
    body: Option<Json<StartRequestBody>>,
) -> Response {
    let inputs = body.map(|Json(b)| b.inputs).unwrap_or_default();
    match state.service.start(&id, &cid, inputs).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => service_error_response(e),
    }
}

async fn cancel_candidate(State(state): State<AppState>, Path((id, cid)): Path<(String, String)>) -> Response {
    match state.service.cancel(&id, &cid).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => service_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetryStepRequestBody {
    step_name: String,
}

async fn retry_step(
    State(state): State<AppState>,
    Path((id, cid)): Path<(String, String)>,
    Json(body): Json<RetryStepRequestBody>,
) -> Response {
    match state.service.retry_step(&id, &cid, &body.step_name).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => service_error_response(e),
    }
}

async fn update_inputs(
    State(state): State<AppState>,
    Path((id, cid)): Path<(String, String)>,
    Json(body): Json<HashMap<String, String>>,
) -> Response {
    match state.service.update_inputs(&id, &cid, body).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => service_error_response(e),
    }
}

async fn get_step_progress(State(state): State<AppState>, Path((id, cid)): Path<(String, String)>) -> Response {
    match state.service.get_step_progress(&id, &cid).await {
        Ok(progress) => (StatusCode::OK, Json(progress)).into_response(),
        Err(e) => service_error_response(e),
    }
}

async fn dry_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CandidateSubmission>,
) -> Response {
    let candidate: Candidate = body.into();
    match state.service.dry_run(&id, &candidate).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => service_error_response(e),
    }
}

/// Wire payload for a migrator's step-status callback (`StepStatusEvent`).
/// Lives here rather than in `domain` — it is purely an inbound transport
/// shape, translated immediately into a `RunSignal`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepStatusEventBody {
    step_name: String,
    #[allow(dead_code)]
    candidate_id: String,
    status: StepStatus,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

async fn record_event(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(body): Json<StepStatusEventBody>,
) -> Response {
    match state
        .service
        .record_step_event(&run_id, body.step_name, body.status, body.metadata)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => service_error_response(e),
    }
}

async fn metrics_overview(State(state): State<AppState>) -> Response {
    match state.service.all_events_for_metrics().await {
        Ok(events) => (StatusCode::OK, Json(metrics::overview(&events))).into_response(),
        Err(e) => service_error_response(e),
    }
}

async fn metrics_per_step(State(state): State<AppState>) -> Response {
    match state.service.all_events_for_metrics().await {
        Ok(events) => (StatusCode::OK, Json(metrics::per_step(&events))).into_response(),
        Err(e) => service_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct TimelineQuery {
    days: Option<u32>,
}

async fn metrics_timeline(State(state): State<AppState>, Query(query): Query<TimelineQuery>) -> Response {
    match state.service.all_events_for_metrics().await {
        Ok(events) => {
            let days = query.days.unwrap_or(30);
            let buckets = metrics::timeline(&events, days, chrono::Utc::now());
            (StatusCode::OK, Json(buckets)).into_response()
        }
        Err(e) => service_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct FailuresQuery {
    limit: Option<usize>,
}

async fn metrics_failures(State(state): State<AppState>, Query(query): Query<FailuresQuery>) -> Response {
    match state.service.all_events_for_metrics().await {
        Ok(events) => {
            let limit = query.limit.unwrap_or(20);
            let failures = metrics::recent_failures(&events, limit);
            (StatusCode::OK, Json(failures)).into_response()
        }
        Err(e) => service_error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ExecutionEngine, LocalEngine};
    use crate::notifier::{DispatchStepRequest, DryRunResult, DryRunner, MigratorNotifier, NotifierResult};
    use crate::store::{InMemoryStore, Store};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct NoopNotifier;

    #[async_trait]
    impl MigratorNotifier for NoopNotifier {
        async fn dispatch(&self, _req: &DispatchStepRequest) -> NotifierResult<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl DryRunner for NoopNotifier {
        async fn dry_run(&self, _migrator_url: &str, _candidate: &Candidate) -> NotifierResult<DryRunResult> {
            Ok(DryRunResult { steps: vec![] })
        }
    }

    fn test_app() -> Router {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let notifier = Arc::new(NoopNotifier);
        let engine: Arc<dyn ExecutionEngine> = Arc::new(LocalEngine::new(store.clone(), notifier.clone(), Default::default()));
        let service = Arc::new(Service::new(store, engine, notifier.clone(), notifier));
        router(AppState { service })
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn announce_then_list_round_trips() {
        let app = test_app();
        let announce_body = serde_json::json!({
            "id": "m1",
            "name": "Widget rollout",
            "migratorUrl": "http://mig",
            "steps": [{"name": "update", "migratorApp": "helm"}],
        });
        let response = app.clone().oneshot(json_request("POST", "/registry/announce", announce_body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(Request::builder().uri("/migrations").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn start_rejects_unknown_input_key_with_400() {
        let app = test_app();
        let announce_body = serde_json::json!({
            "id": "m1",
            "name": "Widget rollout",
            "migratorUrl": "http://mig",
            "steps": [{"name": "update", "migratorApp": "helm"}],
            "requiredInputs": [{"name": "repoName", "label": "Repository"}],
        });
        app.clone().oneshot(json_request("POST", "/registry/announce", announce_body)).await.unwrap();

        let candidates_body = serde_json::json!([{"id": "c1", "kind": "app"}]);
        app.clone()
            .oneshot(json_request("POST", "/migrations/m1/candidates", candidates_body))
            .await
            .unwrap();

        let start_body = serde_json::json!({"inputs": {"bogus": "x"}});
        let response = app
            .oneshot(json_request("POST", "/migrations/m1/candidates/c1/start", start_body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
