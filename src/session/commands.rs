//! HTTP control surface for the session controller.
//!
//! `POST /TurnCameraON` takes `{"status": 1, "time": 120}` to start a session
//! (`time` in seconds, optional) and `{"status": 0}` to stop it. `GET /status` and
//! `GET /sessions` are read-only.

use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{db::CaptureSessionRecord, AppState};

use super::{SessionError, SessionStatus};

const DEFAULT_SESSION_LIST_LIMIT: u32 = 20;

#[derive(Debug, Clone, Deserialize)]
pub struct CameraCommand {
    pub status: i64,
    #[serde(default)]
    pub time: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub already_off: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_timed_out: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SessionListQuery {
    pub limit: Option<u32>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/TurnCameraON", post(turn_camera))
        .route("/status", get(get_status))
        .route("/sessions", get(list_sessions))
        .with_state(state)
}

async fn turn_camera(State(state): State<AppState>, Json(command): Json<CameraCommand>) -> Response {
    match command.status {
        1 => turn_on(&state, command.time).await,
        0 => turn_off(&state).await,
        other => {
            warn!("Invalid camera status value: {other}");
            (
                StatusCode::BAD_REQUEST,
                Json(CommandResponse {
                    ok: false,
                    reason: Some("InvalidStatus".into()),
                    message: Some("Invalid status value. Must be 0 or 1.".into()),
                    ..CommandResponse::default()
                }),
            )
                .into_response()
        }
    }
}

async fn turn_on(state: &AppState, time: Option<i64>) -> Response {
    let duration = match time {
        None => state.default_duration,
        Some(secs) => match u64::try_from(secs) {
            Ok(secs) => Duration::from_secs(secs),
            Err(_) => {
                let config = state.controller.config();
                return rejection(SessionError::InvalidDuration {
                    requested: Duration::ZERO,
                    min: config.min_duration,
                    max: config.max_duration,
                });
            }
        },
    };

    info!("Turn on requested for {:?}", duration);
    match state.controller.turn_on(duration).await {
        Ok(accepted) => (
            StatusCode::OK,
            Json(CommandResponse {
                ok: true,
                duration_seconds: Some(accepted.duration_seconds),
                session_id: Some(accepted.session_id),
                ..CommandResponse::default()
            }),
        )
            .into_response(),
        Err(err) => rejection(err),
    }
}

async fn turn_off(state: &AppState) -> Response {
    info!("Turn off requested");
    let outcome = state.controller.turn_off().await;
    Json(CommandResponse {
        ok: true,
        already_off: outcome.already_off.then_some(true),
        stop_timed_out: outcome.stop_timed_out.then_some(true),
        ..CommandResponse::default()
    })
    .into_response()
}

fn rejection(err: SessionError) -> Response {
    let status = match &err {
        SessionError::InvalidDuration { .. } => StatusCode::BAD_REQUEST,
        SessionError::DeviceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        SessionError::AlreadyActive { .. } => StatusCode::CONFLICT,
    };
    let remaining_seconds = match &err {
        SessionError::AlreadyActive { remaining_seconds } => Some(*remaining_seconds),
        _ => None,
    };

    (
        status,
        Json(CommandResponse {
            ok: false,
            reason: Some(err.reason().to_string()),
            remaining_seconds,
            message: Some(err.to_string()),
            ..CommandResponse::default()
        }),
    )
        .into_response()
}

async fn get_status(State(state): State<AppState>) -> Json<SessionStatus> {
    Json(state.controller.query_status().await)
}

async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<SessionListQuery>,
) -> Result<Json<Vec<CaptureSessionRecord>>, (StatusCode, String)> {
    let limit = query.limit.unwrap_or(DEFAULT_SESSION_LIST_LIMIT);
    state
        .db
        .list_sessions(limit)
        .await
        .map(Json)
        .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))
}
