use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response, Sse, sse::KeepAlive},
    routing::{delete, get, post},
};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::sse::event_stream;
use crate::errors::{ConfigError, SessionError};
use crate::session::cancel::SessionRegistry;
use crate::session::models::GenerateRequest;
use crate::session::orchestrator::SessionOrchestrator;
use crate::session::sandbox::SandboxJanitor;

pub const SESSION_ID_HEADER: HeaderName = HeaderName::from_static("x-session-id");

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub orchestrator: SessionOrchestrator,
    pub janitor: SandboxJanitor,
    pub registry: SessionRegistry,
    /// Events buffered per session before the worker waits on the client
    pub channel_capacity: usize,
    /// Cancel sessions that run longer than this
    pub session_timeout: Option<Duration>,
}

pub type SharedState = Arc<AppState>;

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
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

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::MissingCredential { .. } => ApiError::Internal(err.to_string()),
            ConfigError::MissingPrompt
            | ConfigError::FollowUpWithoutSandbox
            | ConfigError::InvalidSandboxId(_) => ApiError::BadRequest(err.to_string()),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Config(e) => e.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/generate", post(generate))
        .route("/api/sessions/{id}/cancel", post(cancel_session))
        .route("/api/sandboxes/{id}", delete(delete_sandbox))
        .route("/api/status", get(status))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

/// Validate the request, start the session on its own task and stream its
/// events back. Configuration problems are answered with JSON before any
/// stream is opened.
async fn generate(
    State(state): State<SharedState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let mut session = request.into_session()?;
    let invocation = state.orchestrator.prepare(&session)?;

    let session_id = session.id;
    let cancel = state.registry.register(session_id).await;
    if let Some(timeout) = state.session_timeout {
        cancel.cancel_after(timeout);
    }

    let (tx, rx) = mpsc::channel(state.channel_capacity.max(1));
    let guard = cancel.drop_guard();

    let task_state = Arc::clone(&state);
    tokio::spawn(async move {
        task_state
            .orchestrator
            .run(&mut session, &invocation, &tx, &cancel)
            .await;
        task_state.registry.remove(&session.id).await;
        drop(tx);
    });

    let sse = Sse::new(event_stream(rx, Some(guard)))
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL));
    let mut response = sse.into_response();
    if let Ok(value) = HeaderValue::from_str(&session_id.to_string()) {
        response.headers_mut().insert(SESSION_ID_HEADER, value);
    }
    Ok(response)
}

async fn cancel_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = Uuid::parse_str(&id)
        .map_err(|_| ApiError::BadRequest(format!("Invalid session ID '{}'", id)))?;

    if !state.registry.cancel(&session_id).await {
        return Err(ApiError::NotFound(format!("No active session {}", session_id)));
    }
    tracing::info!(session_id = %session_id, "Cancellation requested");
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({"sessionId": session_id, "cancelled": true})),
    ))
}

async fn delete_sandbox(
    State(state): State<SharedState>,
    Path(sandbox_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.janitor.delete(&sandbox_id).await.map_err(|e| {
        tracing::warn!(sandbox_id = %sandbox_id, error = %e, "Sandbox deletion failed");
        match e {
            SessionError::WorkerFailed { .. } => {
                ApiError::Internal("Failed to delete sandbox".to_string())
            }
            other => other.into(),
        }
    })?;
    Ok(Json(serde_json::json!({
        "sandboxId": sandbox_id,
        "message": "Sandbox deleted successfully",
    })))
}

async fn status(State(state): State<SharedState>) -> impl IntoResponse {
    let credentials = state.orchestrator.builder().credential_report();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "activeSessions": state.registry.active().await,
        "credentials": credentials,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::server::sse::{DONE_FRAME, encode_frame};
    use crate::session::invocation::{Credentials, InvocationBuilder};
    use crate::session::testing::{ScriptedLauncher, WorkerScript, test_builder};
    use crate::stream::StreamEvent;
    use crate::stream::extract::OutputRules;

    const PREVIEW: &str = "https://3000-abc.proxy.daytona.work";

    fn state_with(launcher: ScriptedLauncher, builder: InvocationBuilder) -> SharedState {
        let launcher = Arc::new(launcher);
        Arc::new(AppState {
            orchestrator: SessionOrchestrator::new(
                launcher.clone(),
                builder.clone(),
                OutputRules::default(),
            ),
            janitor: SandboxJanitor::new(launcher, builder),
            registry: SessionRegistry::new(),
            channel_capacity: 16,
            session_timeout: None,
        })
    }

    fn test_state(script: WorkerScript) -> SharedState {
        state_with(ScriptedLauncher::new(script), test_builder())
    }

    fn app(state: &SharedState) -> Router {
        api_router().with_state(Arc::clone(state))
    }

    fn generate_request(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/generate")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(body: Body) -> String {
        let bytes = body.collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let state = test_state(WorkerScript::new());
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app(&state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response.into_body()).await, "ok");
    }

    #[tokio::test]
    async fn test_generate_streams_events_then_done() {
        let script = WorkerScript::new()
            .stdout_line("Sandbox created: abc-123")
            .stdout_line(r#"__CLAUDE_MESSAGE__{"content":"Building your todo app"}"#)
            .stdout_line(&format!("Preview URL: {}", PREVIEW));
        let state = test_state(script);

        let response = app(&state)
            .oneshot(generate_request(serde_json::json!({"prompt": "build a todo app"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"].to_str().unwrap(),
            "text/event-stream"
        );
        assert!(response.headers().contains_key(SESSION_ID_HEADER));

        let body = body_text(response.into_body()).await;
        let complete = encode_frame(&StreamEvent::Complete {
            sandbox_id: Some("abc-123".into()),
            preview_url: PREVIEW.into(),
        });
        assert!(body.starts_with("data: {\"type\":\"progress\",\"text\":\"Sandbox created: abc-123\"}"));
        assert!(body.contains("\"type\":\"agent_message\""));
        assert!(body.ends_with(&format!("{}{}", complete, DONE_FRAME)));
        assert_eq!(body.matches("[DONE]").count(), 1);
    }

    #[tokio::test]
    async fn test_generate_worker_failure_ends_with_error_and_done() {
        let state = test_state(WorkerScript::new().exit_code(Some(1)));
        let response = app(&state)
            .oneshot(generate_request(serde_json::json!({"prompt": "build a blog"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_text(response.into_body()).await;
        let expected = format!(
            "{}{}",
            encode_frame(&StreamEvent::error("Worker exited with code 1")),
            DONE_FRAME
        );
        assert_eq!(body, expected);
    }

    #[tokio::test]
    async fn test_generate_missing_prompt_is_bad_request() {
        let state = test_state(WorkerScript::new());
        let response = app(&state)
            .oneshot(generate_request(serde_json::json!({"prompt": ""})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response.into_body()).await;
        assert_eq!(json["error"], "Prompt is required");
    }

    #[tokio::test]
    async fn test_generate_follow_up_without_sandbox_is_bad_request() {
        let launcher = ScriptedLauncher::new(WorkerScript::new());
        let invocations = launcher.invocations();
        let state = state_with(launcher, test_builder());

        let response = app(&state)
            .oneshot(generate_request(
                serde_json::json!({"prompt": "make it blue", "isFollowUp": true}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(invocations.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generate_missing_credential_is_internal_error() {
        let config = Config::default();
        let builder = InvocationBuilder::new(config.worker, config.backends, Credentials::new());
        let state = state_with(ScriptedLauncher::new(WorkerScript::new()), builder);

        let response = app(&state)
            .oneshot(generate_request(serde_json::json!({"prompt": "build a todo app"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response.into_body()).await;
        assert!(json["error"].as_str().unwrap().contains("DAYTONA_API_KEY"));
    }

    #[tokio::test]
    async fn test_generate_malformed_body_is_bad_request() {
        let state = test_state(WorkerScript::new());
        let request = Request::builder()
            .method("POST")
            .uri("/api/generate")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app(&state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cancel_running_session() {
        let launcher = ScriptedLauncher::new(WorkerScript::new().stdout_line("Step 1").hang());
        let killed = launcher.killed();
        let state = state_with(launcher, test_builder());

        let response = app(&state)
            .oneshot(generate_request(serde_json::json!({"prompt": "build a todo app"})))
            .await
            .unwrap();
        let session_id = response.headers()[SESSION_ID_HEADER]
            .to_str()
            .unwrap()
            .to_string();

        let cancel = Request::builder()
            .method("POST")
            .uri(format!("/api/sessions/{}/cancel", session_id))
            .body(Body::empty())
            .unwrap();
        let cancel_response = app(&state).oneshot(cancel).await.unwrap();
        assert_eq!(cancel_response.status(), StatusCode::ACCEPTED);

        let body = body_text(response.into_body()).await;
        assert!(body.ends_with(DONE_FRAME));
        assert!(!body.contains("\"type\":\"complete\""));
        assert!(killed.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(state.registry.active().await, 0);
    }

    #[tokio::test]
    async fn test_cancel_unknown_session_is_not_found() {
        let state = test_state(WorkerScript::new());
        let request = Request::builder()
            .method("POST")
            .uri(format!("/api/sessions/{}/cancel", Uuid::new_v4()))
            .body(Body::empty())
            .unwrap();
        let response = app(&state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel_invalid_session_id_is_bad_request() {
        let state = test_state(WorkerScript::new());
        let request = Request::builder()
            .method("POST")
            .uri("/api/sessions/not-a-uuid/cancel")
            .body(Body::empty())
            .unwrap();
        let response = app(&state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_sandbox() {
        let state = test_state(WorkerScript::new());
        let request = Request::builder()
            .method("DELETE")
            .uri("/api/sandboxes/abc-123")
            .body(Body::empty())
            .unwrap();
        let response = app(&state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response.into_body()).await;
        assert_eq!(json["sandboxId"], "abc-123");
    }

    #[tokio::test]
    async fn test_delete_sandbox_failure_is_internal_error() {
        let state = test_state(WorkerScript::new().exit_code(Some(1)));
        let request = Request::builder()
            .method("DELETE")
            .uri("/api/sandboxes/abc-123")
            .body(Body::empty())
            .unwrap();
        let response = app(&state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response.into_body()).await;
        assert_eq!(json["error"], "Failed to delete sandbox");
    }

    #[tokio::test]
    async fn test_delete_sandbox_invalid_id() {
        let state = test_state(WorkerScript::new());
        let request = Request::builder()
            .method("DELETE")
            .uri("/api/sandboxes/-rf")
            .body(Body::empty())
            .unwrap();
        let response = app(&state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_status_reports_credentials() {
        let state = test_state(WorkerScript::new());
        let request = Request::builder()
            .uri("/api/status")
            .body(Body::empty())
            .unwrap();
        let response = app(&state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response.into_body()).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["activeSessions"], 0);
        assert_eq!(json["credentials"]["sandboxPlatform"], true);
        assert_eq!(json["credentials"]["backends"]["lovable"], true);
    }
}
