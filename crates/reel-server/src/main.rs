use axum::{http::HeaderValue, routing::get, Json, Router};
use reel_extension::{ExtensionBank, ExtensionLoader};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod api;
mod config;
mod state;

use config::ServerConfig;
use state::AppState;

#[derive(Serialize)]
struct ApiStatus {
    status: &'static str,
    version: &'static str,
    extensions: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::from_env();
    let loader = ExtensionLoader::from_env(Arc::new(ExtensionBank::new()));
    tracing::info!(
        languages = ?loader.backends().languages(),
        dir = %config.extension_dir.display(),
        "extension runtime ready"
    );

    if config.load_on_start {
        match loader.load_dir(&config.extension_dir).await {
            Ok(reports) => {
                let failed = reports.iter().filter(|r| !r.is_ok()).count();
                tracing::info!(loaded = reports.len() - failed, failed, "extensions loaded");
            }
            Err(e) => tracing::warn!("could not read extension directory: {e}"),
        }
    }

    let addr = config.bind_addr;
    let cors = cors_layer(&config.cors_origins);
    let state = Arc::new(AppState::new(config, loader));
    let app = app(state).layer(TraceLayer::new_for_http()).layer(cors);

    tracing::info!(%addr, "server started");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// The router with every route and the security headers.
fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .nest("/api", api::routes())
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .with_state(state)
}

/// Restrict CORS to the configured origins; same-origin only when none are set.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let methods = [
        axum::http::Method::GET,
        axum::http::Method::POST,
        axum::http::Method::DELETE,
        axum::http::Method::OPTIONS,
    ];
    if origins.is_empty() {
        tracing::warn!("CORS_ORIGINS not set, cross-origin requests are rejected");
        return CorsLayer::new().allow_methods(methods);
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|s| HeaderValue::from_str(s).ok())
        .collect();
    tracing::info!("CORS allowed origins: {:?}", origins);
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(methods)
        .allow_headers(tower_http::cors::Any)
}

async fn healthz(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> Json<ApiStatus> {
    Json(ApiStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        extensions: state.bank.len().await,
    })
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use crate::api::testing::{app, send, state};

    #[tokio::test]
    async fn test_healthz() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = send(app(state(dir.path())), "GET", "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["extensions"], 0);
    }

    #[test]
    fn test_cors_layer_builds() {
        let _ = super::cors_layer(&[]);
        let _ = super::cors_layer(&["http://localhost:3000".to_string()]);
    }
}
