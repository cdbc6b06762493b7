//! Logging binding shared by every backend.
//!
//! Extension output is untrusted: lines are stripped of control characters
//! and truncated before they reach the host logger.

/// Maximum log message length from extensions, in characters.
const MAX_LOG_MESSAGE_LEN: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    /// Map a `console` method name to a level; unknown names log at info.
    pub fn from_method(method: &str) -> Self {
        match method {
            "debug" | "trace" => Level::Debug,
            "warn" => Level::Warn,
            "error" => Level::Error,
            _ => Level::Info,
        }
    }
}

/// Strip control characters (except newline and tab) and truncate.
pub fn sanitize_log_message(message: &str) -> String {
    let mut chars = message
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t');
    let cleaned: String = chars.by_ref().take(MAX_LOG_MESSAGE_LEN).collect();
    if chars.next().is_some() {
        format!("{cleaned}… (truncated)")
    } else {
        cleaned
    }
}

/// Log a line on behalf of an extension.
pub fn log(extension: &str, level: Level, message: &str) {
    let msg = sanitize_log_message(message);
    match level {
        Level::Debug => tracing::debug!(extension = %extension, "{msg}"),
        Level::Info => tracing::info!(extension = %extension, "{msg}"),
        Level::Warn => tracing::warn!(extension = %extension, "{msg}"),
        Level::Error => tracing::error!(extension = %extension, "{msg}"),
    }
}
