use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use stepwise_agent::{AgentState, Run};

use crate::state::AppState;

/// JSON error body with a status code.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

// GET /api/health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "bind": state.config.bind,
    }))
}

#[derive(Deserialize)]
pub struct InvokeBody {
    pub query: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Serialize)]
pub struct InvokeResponse {
    pub content: String,
    pub total_tokens: u64,
    pub session_id: String,
    pub run_id: String,
    pub steps: usize,
}

// POST /api/invoke
pub async fn invoke(
    State(state): State<Arc<AppState>>,
    Json(body): Json<InvokeBody>,
) -> Result<Json<InvokeResponse>, ApiError> {
    if body.query.trim().is_empty() {
        return Err(ApiError::bad_request("query must not be empty"));
    }

    let session_id = body
        .session_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| state.agent.default_session().to_string());

    info!(session_id = %session_id, "Gateway invocation");
    let run = state
        .agent
        .invoke(&body.query, Some(&session_id))
        .await
        .map_err(|e| {
            error!(session_id = %session_id, error = %e, "Invocation failed");
            ApiError::internal(e.to_string())
        })?;

    let (content, total_tokens) = run
        .final_state()
        .map(|s| (s.reply().to_string(), s.total_tokens))
        .unwrap_or_default();

    Ok(Json(InvokeResponse {
        content,
        total_tokens,
        session_id,
        run_id: run.run_id().to_string(),
        steps: run.steps(),
    }))
}

// GET /api/sessions
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "sessions": state.agent.sessions() }))
}

fn run_summary(run: &Run<AgentState>) -> serde_json::Value {
    let final_state = run.final_state();
    serde_json::json!({
        "run_id": run.run_id(),
        "terminal": run.terminal(),
        "steps": run.steps(),
        "path": run.path(),
        "total_tokens": final_state.map_or(0, |s| s.total_tokens),
        "query": final_state.map(|s| s.user_query.as_str()),
        "reply": final_state.map(|s| s.reply()),
        "started_at": run.started_at(),
        "finished_at": run.finished_at(),
    })
}

// GET /api/sessions/{id}/runs
pub async fn session_runs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    let runs: Vec<serde_json::Value> = state
        .agent
        .session_runs(&id)
        .iter()
        .map(|r| run_summary(r))
        .collect();
    Json(serde_json::json!({ "session_id": id, "runs": runs }))
}

// DELETE /api/sessions/{id}
pub async fn reset_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> StatusCode {
    state.agent.reset_session(&id);
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use serde_json::json;
    use tower::ServiceExt;

    use stepwise_agent::Agent;
    use stepwise_core::config::GatewayConfig;
    use stepwise_core::event::EventBus;
    use stepwise_core::traits::ModelClient;
    use stepwise_test_utils::{test_config, text_response, tool_call_response, ScriptedModel};
    use stepwise_tools::ToolRegistry;

    fn app(model: Arc<dyn ModelClient>) -> axum::Router {
        let agent = Agent::new(
            test_config(),
            model,
            Arc::new(ToolRegistry::with_builtins()),
            Arc::new(EventBus::default()),
        )
        .unwrap();
        crate::server::router(Arc::new(AppState {
            config: GatewayConfig::default(),
            agent: Arc::new(agent),
        }))
    }

    async fn send(app: &axum::Router, method: Method, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(b) => Body::from(b.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(Arc::new(ScriptedModel::default()));
        let (status, body) = send(&app, Method::GET, "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_invoke_runs_tool_loop() {
        let app = app(Arc::new(ScriptedModel::new([
            tool_call_response("c1", "add", json!({"a": 2, "b": 3}), 10),
            text_response("5", 15),
        ])));
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/invoke",
            Some(json!({"query": "2+3?", "session_id": "web"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["content"], "5");
        assert_eq!(body["total_tokens"], 25);
        assert_eq!(body["session_id"], "web");
        assert_eq!(body["steps"], 4);

        let (_, runs) = send(&app, Method::GET, "/api/sessions/web/runs", None).await;
        assert_eq!(runs["runs"].as_array().unwrap().len(), 1);
        assert_eq!(runs["runs"][0]["query"], "2+3?");
    }

    #[tokio::test]
    async fn test_invoke_defaults_session() {
        let app = app(Arc::new(ScriptedModel::new([text_response("hi", 1)])));
        let (status, body) =
            send(&app, Method::POST, "/api/invoke", Some(json!({"query": "hello"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session_id"], "default");
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let app = app(Arc::new(ScriptedModel::default()));
        let (status, body) =
            send(&app, Method::POST, "/api/invoke", Some(json!({"query": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("empty"));
    }

    #[tokio::test]
    async fn test_failed_invocation_is_500() {
        let app = app(Arc::new(ScriptedModel::default()));
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/invoke",
            Some(json!({"query": "hello", "session_id": "s"})),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("model"));

        let (_, runs) = send(&app, Method::GET, "/api/sessions/s/runs", None).await;
        assert!(runs["runs"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reset_session() {
        let app = app(Arc::new(ScriptedModel::new([text_response("hi", 1)])));
        send(
            &app,
            Method::POST,
            "/api/invoke",
            Some(json!({"query": "hello", "session_id": "s"})),
        )
        .await;

        let (status, _) = send(&app, Method::DELETE, "/api/sessions/s", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, runs) = send(&app, Method::GET, "/api/sessions/s/runs", None).await;
        assert!(runs["runs"].as_array().unwrap().is_empty());

        let (_, sessions) = send(&app, Method::GET, "/api/sessions", None).await;
        assert_eq!(sessions["sessions"], json!(["s"]));
    }
}
