use super::state::AppState;
use crate::error::CaptureError;
use crate::session::StatusUpdate;
use crate::tab::{TabId, TabInfo};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartCaptureRequest {
    pub tab_id: TabId,
    pub url: String,
    pub title: Option<String>,
    pub favicon_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartCaptureResponse {
    pub tab_id: TabId,
    pub resource_identity: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct StopCaptureResponse {
    pub stopped: usize,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub tab_id: Option<TabId>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub reason: CaptureError,
}

fn error_response(err: CaptureError) -> Response {
    let status = match &err {
        CaptureError::AlreadyRecording(_) | CaptureError::AlreadyPending(_) => StatusCode::CONFLICT,
        CaptureError::ManagerStopped => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            reason: err,
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /capture/start
/// Start capturing a tab
pub async fn start_capture(
    State(state): State<AppState>,
    Json(req): Json<StartCaptureRequest>,
) -> Response {
    info!("Start capture requested for tab {}", req.tab_id);

    let tab = TabInfo {
        id: req.tab_id,
        url: req.url,
        title: req.title,
        favicon_url: req.favicon_url,
    };

    match state.manager.start_capture(tab).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(StartCaptureResponse {
                tab_id: outcome.tab_id,
                resource_identity: outcome.resource_identity.to_string(),
                status: "pending".to_string(),
            }),
        )
            .into_response(),
        Err(e) => {
            warn!("Start capture for tab {} rejected: {}", req.tab_id, e);
            error_response(e)
        }
    }
}

/// POST /capture/stop/:tab_id
/// Stop capturing a tab; a tab without a session is a no-op
pub async fn stop_capture(State(state): State<AppState>, Path(tab_id): Path<TabId>) -> Response {
    match state.manager.stop_capture(tab_id).await {
        Ok(stopped) => (
            StatusCode::OK,
            Json(StopCaptureResponse {
                stopped: usize::from(stopped),
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /capture/stop-all
pub async fn stop_all_capture(State(state): State<AppState>) -> Response {
    match state.manager.stop_all().await {
        Ok(stopped) => (StatusCode::OK, Json(StopCaptureResponse { stopped })).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /status?tab_id=
pub async fn get_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Response {
    match state.manager.get_status(query.tab_id).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /sessions
pub async fn get_all_sessions(State(state): State<AppState>) -> Response {
    match state.manager.get_all_sessions().await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /tabs/:tab_id/removed
pub async fn tab_removed(State(state): State<AppState>, Path(tab_id): Path<TabId>) -> Response {
    match state.manager.tab_removed(tab_id) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /tabs/:tab_id/activated
pub async fn tab_activated(State(state): State<AppState>, Path(tab_id): Path<TabId>) -> Response {
    match state.manager.tab_activated(tab_id) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /suspend
/// Tear down every session
pub async fn suspend(State(state): State<AppState>) -> Response {
    match state.manager.suspend().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /events
/// Server-sent `statusUpdate` stream
pub async fn status_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let updates = state.manager.subscribe();
    Sse::new(status_stream(updates)).keep_alive(KeepAlive::default())
}

fn status_stream(
    updates: broadcast::Receiver<StatusUpdate>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(updates, |mut updates| async move {
        loop {
            match updates.recv().await {
                Ok(update) => {
                    let event = match Event::default().event("statusUpdate").json_data(&update) {
                        Ok(event) => event,
                        Err(e) => {
                            error!("Failed to encode status update: {}", e);
                            continue;
                        }
                    };
                    return Some((Ok(event), updates));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Status stream lagged, skipped {} updates", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
