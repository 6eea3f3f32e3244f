use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cloudpilot_agent::AgentRuntime;
use cloudpilot_core::{CanonicalResult, Provider};

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<AgentRuntime>,
    pub providers: Vec<Provider>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/query", post(query))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    /// Omit to start a fresh conversation; the reply carries the id to reuse.
    #[serde(default)]
    pub session_id: Option<String>,
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub session_id: String,
    #[serde(flatten)]
    pub result: CanonicalResult,
}

pub async fn query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Json<QueryResponse> {
    let session_id = normalize_session_id(request.session_id);
    let result = state.runtime.handle_utterance(&session_id, &request.query).await;
    Json(QueryResponse { session_id, result })
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub providers: Vec<Provider>,
    pub active_sessions: usize,
    pub checked_at: String,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let active_sessions = state.runtime.sessions().active_sessions().await;
    Json(HealthResponse {
        status: "ready",
        providers: state.providers.clone(),
        active_sessions,
        checked_at: Utc::now().to_rfc3339(),
    })
}

fn normalize_session_id(raw: Option<String>) -> String {
    match raw {
        Some(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => Uuid::new_v4().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use cloudpilot_core::{CanonicalResult, ErrorCode, ErrorInfo};

    use super::{normalize_session_id, QueryRequest, QueryResponse};

    #[test]
    fn missing_session_ids_get_a_generated_uuid() {
        let generated = normalize_session_id(None);
        assert_eq!(generated.len(), 36);
        assert_ne!(generated, normalize_session_id(None));

        assert_eq!(normalize_session_id(Some("  ".to_string())).len(), 36);
        assert_eq!(normalize_session_id(Some(" alice ".to_string())), "alice");
    }

    #[test]
    fn query_request_tolerates_an_omitted_session_id() {
        let request: QueryRequest =
            serde_json::from_str(r#"{"query": "list my instances"}"#).expect("deserializable");
        assert!(request.session_id.is_none());
        assert_eq!(request.query, "list my instances");
    }

    #[test]
    fn query_response_flattens_the_result_alongside_the_session_id() {
        let response = QueryResponse {
            session_id: "alice".to_string(),
            result: CanonicalResult::Error(ErrorInfo::new(
                ErrorCode::UnresolvedIntent,
                "could not resolve",
            )),
        };
        let json = serde_json::to_value(&response).expect("serializable");
        assert_eq!(json["session_id"], "alice");
        assert_eq!(json["kind"], "error");
        assert_eq!(json["code"], "unresolved_intent");
    }
}
