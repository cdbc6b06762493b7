//! Media player control endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use reel_extension::adapters::media_player::{PlaybackRequest, PlaybackStatus};
use reel_extension::MediaPlayer;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{extension_error, invocation_error, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SeekRequest {
    /// Seconds from the start.
    pub position: f64,
}

async fn player(state: &AppState, id: &str) -> ApiResult<MediaPlayer> {
    state.bank.media_player(id).await.map_err(extension_error)
}

fn done(command: &str) -> Json<Value> {
    Json(json!({ "status": "ok", "command": command }))
}

/// POST /api/mediaplayer/{id}/play
pub async fn play(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<PlaybackRequest>,
) -> ApiResult<Json<Value>> {
    player(&state, &id)
        .await?
        .play(&request)
        .await
        .map_err(invocation_error)?;
    Ok(done("play"))
}

/// POST /api/mediaplayer/{id}/pause
pub async fn pause(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    player(&state, &id).await?.pause().await.map_err(invocation_error)?;
    Ok(done("pause"))
}

/// POST /api/mediaplayer/{id}/resume
pub async fn resume(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    player(&state, &id).await?.resume().await.map_err(invocation_error)?;
    Ok(done("resume"))
}

/// POST /api/mediaplayer/{id}/seek
pub async fn seek(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<SeekRequest>,
) -> ApiResult<Json<Value>> {
    player(&state, &id)
        .await?
        .seek(request.position)
        .await
        .map_err(invocation_error)?;
    Ok(done("seek"))
}

/// POST /api/mediaplayer/{id}/stop
pub async fn stop(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    player(&state, &id).await?.stop().await.map_err(invocation_error)?;
    Ok(done("stop"))
}

/// GET /api/mediaplayer/{id}/status
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<PlaybackStatus>> {
    let status = player(&state, &id)
        .await?
        .status()
        .await
        .map_err(invocation_error)?;
    Ok(Json(status))
}
