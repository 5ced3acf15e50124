//! HTTP handlers.
//!
//! Create, start and destroy answer as soon as the backend has accepted
//! the request. The reported status means "accepted", not "done"; the
//! outcome shows up later on `GET /session/{id}`.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use matchforge_backend::SessionBackend;
use matchforge_session::Session;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ApiError;
use crate::server::AppContext;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct MatchRequest {
    pub player1: String,
    pub player2: String,
}

/// Body of the create, start and destroy responses.
#[derive(Debug, Serialize)]
pub struct IntentResponse {
    pub session_id: String,
    pub status: &'static str,
}

/// A session as reported by the status endpoints.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub state: &'static str,
    /// Why the session failed, when `state` is `"failed"`.
    pub failure: Option<String>,
    pub last_result: Option<String>,
    pub started: bool,
    pub bucket_id: String,
    pub max_players: u32,
}

impl From<Session> for SessionView {
    fn from(session: Session) -> Self {
        Self {
            state: session.state.name(),
            failure: session.state.failure().map(|reason| reason.to_string()),
            last_result: session.last_result.map(|code| code.to_string()),
            started: session.started,
            bucket_id: session.bucket_id,
            max_players: session.max_players,
            session_id: session.name,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionList {
    pub sessions: Vec<SessionView>,
}

/// Session name for a pairing of two players.
pub fn session_name(player1: &str, player2: &str) -> String {
    format!("match_{player1}_{player2}")
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /livez
pub async fn livez() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// POST /matchmaking
pub async fn create_match<B: SessionBackend>(
    State(ctx): State<AppContext<B>>,
    payload: Result<Json<MatchRequest>, JsonRejection>,
) -> Result<Json<IntentResponse>, ApiError> {
    let Json(req) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

    let player1 = req.player1.trim();
    let player2 = req.player2.trim();
    if player1.is_empty() || player2.is_empty() {
        return Err(ApiError::BadRequest(
            "player1 and player2 must both be non-empty".into(),
        ));
    }

    let name = session_name(player1, player2);
    let accepted = ctx.orchestrator.create_session(
        &name,
        &ctx.defaults.bucket_id,
        ctx.defaults.max_players,
    )?;
    info!(session = %name, player1, player2, "match session requested");

    Ok(Json(IntentResponse {
        session_id: accepted.into_value(),
        status: "created",
    }))
}

/// POST /session/start/{id}
pub async fn start_session<B: SessionBackend>(
    State(ctx): State<AppContext<B>>,
    Path(session_id): Path<String>,
) -> Result<Json<IntentResponse>, ApiError> {
    ctx.orchestrator.start_session(&session_id)?.into_value();
    Ok(Json(IntentResponse {
        session_id,
        status: "started",
    }))
}

/// DELETE /session/{id}
pub async fn destroy_session<B: SessionBackend>(
    State(ctx): State<AppContext<B>>,
    Path(session_id): Path<String>,
) -> Result<Json<IntentResponse>, ApiError> {
    ctx.orchestrator.destroy_session(&session_id)?.into_value();
    Ok(Json(IntentResponse {
        session_id,
        status: "destroyed",
    }))
}

/// GET /session/{id}
pub async fn get_session<B: SessionBackend>(
    State(ctx): State<AppContext<B>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let session = ctx
        .orchestrator
        .session(&session_id)
        .ok_or(ApiError::NotFound(session_id))?;
    Ok(Json(session.into()))
}

/// GET /sessions
pub async fn list_sessions<B: SessionBackend>(
    State(ctx): State<AppContext<B>>,
) -> Json<SessionList> {
    let sessions = ctx
        .orchestrator
        .sessions()
        .into_iter()
        .map(SessionView::from)
        .collect();
    Json(SessionList { sessions })
}
