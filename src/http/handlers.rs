use super::state::AppState;
use crate::session::{SessionState, SessionStats, TranscriptTurn};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::info;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub session_id: String,
    pub state: SessionState,
    pub stats: SessionStats,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ControlResponse {
    pub session_id: String,
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn terminated(session_id: String) -> axum::response::Response {
    (
        StatusCode::CONFLICT,
        Json(ErrorResponse {
            error: format!("Session {} has terminated", session_id),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /session/status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.engine.snapshot();
    Json(StatusResponse {
        session_id: snapshot.session_id,
        state: snapshot.state,
        stats: snapshot.stats,
    })
}

/// GET /session/transcript
/// Every turn completed so far, including turns before a reset
pub async fn get_transcript(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.engine.snapshot();
    let turns: Vec<TranscriptTurn> = snapshot.turns.iter().map(TranscriptTurn::from).collect();
    Json(turns)
}

/// POST /session/interrupt
/// Cut the current reply short, as if the user had barged in
pub async fn interrupt(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.engine.snapshot();
    if snapshot.state.is_terminal() || state.engine.is_stopped() {
        return terminated(snapshot.session_id);
    }

    info!("Interrupt requested over HTTP (state: {})", snapshot.state);
    state.engine.interrupt();

    let status = if snapshot.state == SessionState::Speaking {
        "interrupted"
    } else {
        "not_speaking"
    };
    (
        StatusCode::ACCEPTED,
        Json(ControlResponse {
            session_id: snapshot.session_id,
            status: status.to_string(),
        }),
    )
        .into_response()
}

/// POST /session/stop
pub async fn stop(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.engine.snapshot();
    if snapshot.state.is_terminal() {
        return terminated(snapshot.session_id);
    }

    info!("Stop requested over HTTP");
    state.engine.stop();

    (
        StatusCode::ACCEPTED,
        Json(ControlResponse {
            session_id: snapshot.session_id,
            status: "stopping".to_string(),
        }),
    )
        .into_response()
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
