//! HTTP handlers — thin collaborators over the session runtime.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use tether_protocol::{SessionOptions, SessionState};

use crate::agent::Agent;
use crate::session::Session;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub cwd: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub resume_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: String,
    pub summary: String,
    pub state: SessionState,
    pub cwd: String,
}

impl SessionResponse {
    fn from_session(session: &Session) -> Self {
        Self {
            id: session.id().to_string(),
            summary: session.summary(),
            state: session.state(),
            cwd: session.metadata().project_path,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

pub async fn create_session(
    State(agent): State<Arc<Agent>>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<SessionResponse>, (StatusCode, String)> {
    let options = SessionOptions {
        project_path: request.cwd,
        model: request.model,
        resume_id: request.resume_id,
        add_dirs: Vec::new(),
    };
    let session = agent
        .create_session(options)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(SessionResponse::from_session(&session)))
}

pub async fn list_sessions(
    State(agent): State<Arc<Agent>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<SessionResponse>>, (StatusCode, String)> {
    let sessions = agent
        .sessions(query.limit, query.offset.unwrap_or(0))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(
        sessions
            .iter()
            .map(|s| SessionResponse::from_session(s))
            .collect(),
    ))
}

pub async fn delete_session(
    State(agent): State<Arc<Agent>>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    agent
        .delete_session(&id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn health() -> &'static str {
    "OK"
}
