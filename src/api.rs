use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::OrchestratorError;
use crate::model::{Brief, Phase};
use crate::notify::Notifier;
use crate::orchestrator::Orchestrator;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub orchestrator: Orchestrator,
    pub notifier: Notifier,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ForcePhaseRequest {
    pub phase: Phase,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match &err {
            OrchestratorError::Validation(_)
            | OrchestratorError::InvalidState { .. }
            | OrchestratorError::Agent { .. } => ApiError::BadRequest(err.to_string()),
            OrchestratorError::RunNotFound { .. } | OrchestratorError::TaskNotFound { .. } => {
                ApiError::NotFound(err.to_string())
            }
            OrchestratorError::Store(_) => ApiError::Internal(err.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/runs", get(list_runs).post(create_run))
        .route("/runs/{id}", get(get_run).delete(delete_run))
        .route("/runs/{id}/advance", post(advance_run))
        .route("/runs/{id}/tasks/{task_id}/resolve", post(resolve_task))
        .route("/runs/{id}/pause", post(pause_run))
        .route("/runs/{id}/resume", post(resume_run))
        .route("/runs/{id}/fail", post(fail_run))
        .route("/runs/{id}/phase", post(force_phase))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn create_run(
    State(state): State<SharedState>,
    Json(brief): Json<Brief>,
) -> Result<impl IntoResponse, ApiError> {
    let run = state.orchestrator.create_run(brief).await?;
    Ok((StatusCode::CREATED, Json(run)))
}

async fn list_runs(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let runs = state.orchestrator.list_runs().await?;
    Ok(Json(runs))
}

async fn get_run(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let run = state.orchestrator.get_run(id).await?;
    Ok(Json(run))
}

async fn advance_run(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.orchestrator.advance(id).await?;
    Ok(Json(outcome))
}

async fn resolve_task(
    State(state): State<SharedState>,
    Path((id, task_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let run = state.orchestrator.resolve_task(id, task_id).await?;
    Ok(Json(run))
}

async fn pause_run(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let run = state.orchestrator.pause_run(id).await?;
    Ok(Json(run))
}

async fn resume_run(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let run = state.orchestrator.resume_run(id).await?;
    Ok(Json(run))
}

async fn fail_run(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let run = state.orchestrator.fail_run(id).await?;
    Ok(Json(run))
}

async fn force_phase(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ForcePhaseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let run = state.orchestrator.force_phase(id, req.phase).await?;
    Ok(Json(run))
}

async fn delete_run(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.orchestrator.delete_run(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ThemeSynthesisAgent;
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_app() -> (Router, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Notifier::new();
        let orchestrator = Orchestrator::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ThemeSynthesisAgent),
            notifier.clone(),
            dir.path(),
        );
        let state = Arc::new(AppState {
            orchestrator,
            notifier,
        });
        (api_router().with_state(state), dir)
    }

    async fn body_json<T: serde::de::DeserializeOwned>(body: Body) -> T {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn brief_body() -> String {
        serde_json::json!({
            "industry": "hypercasual",
            "theme": "neon skyline",
            "goal": "Generate runner concepts"
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_health_check() {
        let (app, _dir) = test_app();

        let request = Request::builder()
            .method("GET")
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_create_run_returns_created() {
        let (app, _dir) = test_app();

        let request = Request::builder()
            .method("POST")
            .uri("/runs")
            .header("content-type", "application/json")
            .body(Body::from(brief_body()))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let run: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(run["status"], "queued");
        assert_eq!(run["phase"], "market");
        assert!(run["id"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_create_run_rejects_invalid_brief() {
        let (app, _dir) = test_app();

        let request = Request::builder()
            .method("POST")
            .uri("/runs")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({"industry": "", "theme": "x", "goal": "y"}).to_string(),
            ))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = body_json(response.into_body()).await;
        assert!(body["error"].as_str().unwrap().contains("industry"));
    }

    #[tokio::test]
    async fn test_get_unknown_run_is_404() {
        let (app, _dir) = test_app();

        let request = Request::builder()
            .method("GET")
            .uri(format!("/runs/{}", Uuid::new_v4()))
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_run_id_is_rejected() {
        let (app, _dir) = test_app();

        let request = Request::builder()
            .method("GET")
            .uri("/runs/not-a-uuid")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_advance_blocked_run_is_400() {
        let (app, _dir) = test_app();

        let request = Request::builder()
            .method("POST")
            .uri("/runs")
            .header("content-type", "application/json")
            .body(Body::from(brief_body()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let run: serde_json::Value = body_json(response.into_body()).await;
        let id = run["id"].as_str().unwrap().to_string();

        let request = Request::builder()
            .method("POST")
            .uri(format!("/runs/{id}/advance"))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let request = Request::builder()
            .method("POST")
            .uri(format!("/runs/{id}/advance"))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = body_json(response.into_body()).await;
        assert!(body["error"].as_str().unwrap().contains("awaiting_human"));
    }

    #[tokio::test]
    async fn test_delete_run_is_no_content_then_404() {
        let (app, _dir) = test_app();

        let request = Request::builder()
            .method("POST")
            .uri("/runs")
            .header("content-type", "application/json")
            .body(Body::from(brief_body()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let run: serde_json::Value = body_json(response.into_body()).await;
        let id = run["id"].as_str().unwrap().to_string();

        let request = Request::builder()
            .method("DELETE")
            .uri(format!("/runs/{id}"))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let request = Request::builder()
            .method("DELETE")
            .uri(format!("/runs/{id}"))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_force_phase_sets_pointer() {
        let (app, _dir) = test_app();

        let request = Request::builder()
            .method("POST")
            .uri("/runs")
            .header("content-type", "application/json")
            .body(Body::from(brief_body()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let run: serde_json::Value = body_json(response.into_body()).await;
        let id = run["id"].as_str().unwrap().to_string();

        let request = Request::builder()
            .method("POST")
            .uri(format!("/runs/{id}/phase"))
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({"phase": "deconstruct"}).to_string(),
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let updated: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(updated["phase"], "deconstruct");
        assert_eq!(updated["status"], "queued");
    }
}
