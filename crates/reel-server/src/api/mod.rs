pub mod extensions;
pub mod mediaplayer;
pub mod providers;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use reel_extension::{ExtensionError, InvocationError, LoadError};
use serde_json::{json, Value};

use crate::state::AppState;

pub type ApiError = (StatusCode, Json<Value>);
pub type ApiResult<T> = Result<T, ApiError>;

/// Routes mounted under `/api`.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/extensions",
            get(extensions::list_extensions).post(extensions::load_extension),
        )
        .route("/extensions/reload", post(extensions::reload_extensions))
        .route(
            "/extensions/{id}",
            get(extensions::get_extension).delete(extensions::unload_extension),
        )
        .route("/mediaplayer/{id}/play", post(mediaplayer::play))
        .route("/mediaplayer/{id}/pause", post(mediaplayer::pause))
        .route("/mediaplayer/{id}/resume", post(mediaplayer::resume))
        .route("/mediaplayer/{id}/seek", post(mediaplayer::seek))
        .route("/mediaplayer/{id}/stop", post(mediaplayer::stop))
        .route("/mediaplayer/{id}/status", get(mediaplayer::status))
        .route("/torrents/search", get(providers::search_torrents))
        .route("/manga/{id}/search", get(providers::search_manga))
        .route("/onlinestream/{id}/search", get(providers::search_onlinestream))
}

fn error(status: StatusCode, kind: &str, message: impl std::fmt::Display) -> ApiError {
    (
        status,
        Json(json!({ "error": message.to_string(), "kind": kind })),
    )
}

pub fn load_error(e: LoadError) -> ApiError {
    let (status, kind) = match &e {
        LoadError::UnsupportedLanguage(_) => (StatusCode::BAD_REQUEST, "unsupported_language"),
        LoadError::InvalidDescriptor(_) => (StatusCode::BAD_REQUEST, "invalid_descriptor"),
        LoadError::Serialization(_) => (StatusCode::BAD_REQUEST, "invalid_descriptor"),
        LoadError::TomlParse(_) => (StatusCode::BAD_REQUEST, "invalid_descriptor"),
        LoadError::Semver(_) => (StatusCode::BAD_REQUEST, "invalid_descriptor"),
        LoadError::CompileError(_) => (StatusCode::UNPROCESSABLE_ENTITY, "compile_error"),
        LoadError::MissingExport(_) => (StatusCode::UNPROCESSABLE_ENTITY, "missing_export"),
        LoadError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io"),
    };
    error(status, kind, e)
}

pub fn invocation_error(e: InvocationError) -> ApiError {
    let (status, kind) = match &e {
        InvocationError::Marshal(_) => (StatusCode::BAD_REQUEST, "marshal"),
        InvocationError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
        InvocationError::Poisoned(_) => (StatusCode::SERVICE_UNAVAILABLE, "poisoned"),
        InvocationError::Closed(_) => (StatusCode::SERVICE_UNAVAILABLE, "closed"),
        InvocationError::Exception { .. } => (StatusCode::BAD_GATEWAY, "exception"),
        InvocationError::ReturnType { .. } => (StatusCode::BAD_GATEWAY, "return_type"),
        InvocationError::UnknownFunction(_) => (StatusCode::BAD_GATEWAY, "unknown_function"),
        InvocationError::ResourceLimit { .. } => (StatusCode::BAD_GATEWAY, "resource_limit"),
        InvocationError::Panicked(_) => (StatusCode::BAD_GATEWAY, "panicked"),
    };
    tracing::warn!(kind, "extension call failed: {e}");
    error(status, kind, e)
}

pub fn extension_error(e: ExtensionError) -> ApiError {
    match e {
        ExtensionError::NotFound(_) => error(StatusCode::NOT_FOUND, "not_found", e),
        ExtensionError::WrongType { .. } => error(StatusCode::BAD_REQUEST, "wrong_type", e),
        ExtensionError::Load(e) => load_error(e),
        ExtensionError::Invocation(e) => invocation_error(e),
    }
}
