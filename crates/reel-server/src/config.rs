//! Server configuration from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory scanned for `*.json` / `*.toml` extension manifests.
    pub extension_dir: PathBuf,
    pub bind_addr: SocketAddr,
    /// Allowed CORS origins; empty means same-origin only.
    pub cors_origins: Vec<String>,
    /// Load the extension directory at startup.
    pub load_on_start: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            extension_dir: PathBuf::from("./extensions"),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            cors_origins: Vec::new(),
            load_on_start: true,
        }
    }
}

impl ServerConfig {
    /// Read `EXTENSION_DIR`, `REEL_BIND_ADDR`, `CORS_ORIGINS` and
    /// `EXTENSION_LOAD_ON_START`, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bind = std::env::var("REEL_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.into());
        let bind_addr = bind.parse().unwrap_or_else(|e| {
            tracing::warn!(value = %bind, "invalid REEL_BIND_ADDR ({e}), using {DEFAULT_BIND_ADDR}");
            defaults.bind_addr
        });

        Self {
            extension_dir: std::env::var("EXTENSION_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.extension_dir),
            bind_addr,
            cors_origins: parse_origins(&std::env::var("CORS_ORIGINS").unwrap_or_default()),
            load_on_start: std::env::var("EXTENSION_LOAD_ON_START")
                .map(|v| !v.eq_ignore_ascii_case("false"))
                .unwrap_or(defaults.load_on_start),
        }
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}
