//! HTTP ingestion routes.
//!
//! Every route validates the message shape, enqueues it for the capture
//! loop and answers `202 Accepted`. Whether the message actually lands in
//! a turn is decided later by the loop; routing misses are only visible in
//! the logs and the tracker counters.

use crate::capture::{AudioFragment, DataEvent, SessionEnd, SessionStart};
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Body of `POST /sessions/{id}/end`; the id comes from the path.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEndBody {
    pub duration: Option<f64>,
    pub event_count: Option<u64>,
    pub transcript: Option<String>,
}

pub fn validate_start(start: &SessionStart) -> AppResult<()> {
    if start.id.trim().is_empty() {
        return Err(AppError::ValidationError("Session id cannot be empty".to_string()));
    }
    Ok(())
}

pub fn validate_event(event: &DataEvent) -> AppResult<()> {
    if event.event_type.trim().is_empty() {
        return Err(AppError::ValidationError("Event type cannot be empty".to_string()));
    }
    Ok(())
}

pub fn validate_audio(fragment: &AudioFragment) -> AppResult<()> {
    if fragment.data.is_empty() {
        return Err(AppError::ValidationError("Audio fragment has no data".to_string()));
    }
    Ok(())
}

pub fn validate_end(end: &SessionEnd) -> AppResult<()> {
    if end.id.trim().is_empty() {
        return Err(AppError::ValidationError("Session id cannot be empty".to_string()));
    }
    Ok(())
}

fn accepted(kind: &str, session_id: Option<&str>) -> HttpResponse {
    HttpResponse::Accepted().json(json!({
        "status": "accepted",
        "kind": kind,
        "session_id": session_id,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// `POST /api/v1/sessions`
pub async fn start_session(
    state: web::Data<AppState>,
    body: web::Json<SessionStart>,
) -> Result<HttpResponse, AppError> {
    let start = body.into_inner();
    validate_start(&start)?;
    let id = start.id.clone();
    state.capture.start_session(start)?;
    debug!(session_id = %id, "Session start queued");
    Ok(accepted("session_start", Some(&id)))
}

/// `POST /api/v1/sessions/{id}/end`
pub async fn end_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: Option<web::Json<SessionEndBody>>,
) -> Result<HttpResponse, AppError> {
    let body = body.map(web::Json::into_inner).unwrap_or_default();
    let end = SessionEnd {
        id: path.into_inner(),
        duration: body.duration,
        event_count: body.event_count,
        transcript: body.transcript,
    };
    validate_end(&end)?;
    let id = end.id.clone();
    state.capture.end_session(end)?;
    debug!(session_id = %id, "Session end queued");
    Ok(accepted("session_end", Some(&id)))
}

/// `POST /api/v1/events`
pub async fn ingest_event(
    state: web::Data<AppState>,
    body: web::Json<DataEvent>,
) -> Result<HttpResponse, AppError> {
    let event = body.into_inner();
    validate_event(&event)?;
    let session_id = event.session_id.clone();
    state.capture.send_event(event)?;
    Ok(accepted("event", session_id.as_deref()))
}

/// `POST /api/v1/audio`
pub async fn ingest_audio(
    state: web::Data<AppState>,
    body: web::Json<AudioFragment>,
) -> Result<HttpResponse, AppError> {
    let fragment = body.into_inner();
    validate_audio(&fragment)?;
    let session_id = fragment.session_id.clone();
    state.capture.send_audio(fragment)?;
    Ok(accepted("audio", session_id.as_deref()))
}

/// `GET /api/v1/sessions`
pub async fn list_sessions(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let snapshot = state.capture.snapshot().await?;
    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "capture": snapshot
    })))
}
