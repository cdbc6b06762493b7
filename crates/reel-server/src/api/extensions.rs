//! Extension management endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use reel_extension::{ExtensionDescriptor, ExtensionError, ExtensionInfo, Language, LoadError};
use serde::Serialize;
use serde_json::{json, Value};

use super::{extension_error, load_error, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ExtensionListResponse {
    pub extensions: Vec<ExtensionInfo>,
    pub languages: Vec<Language>,
}

#[derive(Debug, Serialize)]
pub struct ExtensionDetail {
    #[serde(flatten)]
    pub info: ExtensionInfo,
    pub exports: Vec<String>,
    pub poisoned: bool,
}

/// GET /api/extensions: List loaded extensions.
pub async fn list_extensions(State(state): State<Arc<AppState>>) -> Json<ExtensionListResponse> {
    Json(ExtensionListResponse {
        extensions: state.bank.list().await,
        languages: state.loader.backends().languages(),
    })
}

/// GET /api/extensions/{id}: One extension with its exports.
pub async fn get_extension(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ExtensionDetail>> {
    let entry = state
        .bank
        .get(&id)
        .await
        .ok_or_else(|| extension_error(ExtensionError::NotFound(id)))?;
    let sandbox = entry.extension.sandbox();

    Ok(Json(ExtensionDetail {
        info: entry.info.clone(),
        exports: sandbox.exports().keys().cloned().collect(),
        poisoned: sandbox.is_poisoned(),
    }))
}

/// POST /api/extensions: Load a descriptor, replacing any extension with
/// the same id.
pub async fn load_extension(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<ExtensionInfo>)> {
    let descriptor: ExtensionDescriptor =
        serde_json::from_value(body).map_err(|e| load_error(LoadError::from(e)))?;

    let info = state.loader.load(&descriptor).await.map_err(|e| {
        tracing::error!(extension = %descriptor.id, "extension load via API failed: {e}");
        load_error(e)
    })?;

    Ok((StatusCode::CREATED, Json(info)))
}

/// DELETE /api/extensions/{id}: Unload an extension.
pub async fn unload_extension(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let info = state.loader.unload(&id).await.map_err(extension_error)?;
    Ok(Json(json!({ "status": "unloaded", "id": info.id })))
}

/// POST /api/extensions/reload: Reload the extension directory in the
/// background. Only one reload runs at a time.
pub async fn reload_extensions(
    State(state): State<Arc<AppState>>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let permit = state.reload_guard.try_start().ok_or_else(|| {
        (
            StatusCode::CONFLICT,
            Json(json!({ "error": "a reload is already running", "kind": "busy" })),
        )
    })?;

    let loader = state.loader.clone();
    let dir = state.config.extension_dir.clone();
    tokio::spawn(async move {
        let _permit = permit;
        match loader.load_dir(&dir).await {
            Ok(reports) => {
                let failed = reports.iter().filter(|r| !r.is_ok()).count();
                tracing::info!(
                    loaded = reports.len() - failed,
                    failed,
                    "extension reload finished"
                );
            }
            Err(e) => tracing::error!(dir = %dir.display(), "extension reload failed: {e}"),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": "reload started" })),
    ))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::StatusCode;
    use serde_json::json;

    use crate::api::testing::{app, descriptor, send, state, PLAYER};

    #[tokio::test]
    async fn test_load_list_get_unload() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());

        let (status, body) = send(
            app(state.clone()),
            "POST",
            "/api/extensions",
            Some(descriptor("mpv", "mediaplayer", "javascript", PLAYER)),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["id"], "mpv");

        let (status, body) = send(app(state.clone()), "GET", "/api/extensions", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["extensions"][0]["id"], "mpv");
        assert!(body["languages"].as_array().unwrap().contains(&json!("rhai")));

        let (status, body) = send(app(state.clone()), "GET", "/api/extensions/mpv", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["type"], "mediaplayer");
        assert_eq!(body["poisoned"], false);
        assert!(body["exports"].as_array().unwrap().contains(&json!("getStatus")));

        let (status, _) = send(app(state.clone()), "DELETE", "/api/extensions/mpv", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send(app(state), "GET", "/api/extensions/mpv", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "not_found");
    }

    #[tokio::test]
    async fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());

        let (status, body) = send(
            app(state.clone()),
            "POST",
            "/api/extensions",
            Some(descriptor("half", "mediaplayer", "rhai", "fn play(r) {}")),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["kind"], "missing_export");

        let (status, body) = send(
            app(state.clone()),
            "POST",
            "/api/extensions",
            Some(json!({ "id": "nolang", "type": "mediaplayer", "payload": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_descriptor");

        assert!(state.bank.is_empty().await);
    }

    #[tokio::test]
    async fn test_reload_loads_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("mpv.json"),
            descriptor("mpv", "mediaplayer", "js", PLAYER).to_string(),
        )
        .unwrap();
        let state = state(dir.path());

        let (status, _) = send(app(state.clone()), "POST", "/api/extensions/reload", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        for _ in 0..100 {
            if state.bank.get("mpv").await.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(state.bank.get("mpv").await.is_some());
    }

    #[tokio::test]
    async fn test_reload_busy() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let _running = state.reload_guard.try_start().unwrap();

        let (status, body) = send(app(state.clone()), "POST", "/api/extensions/reload", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "busy");
    }
}
