//! Media player extensions: drive an external player.

use std::sync::Arc;

use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

use crate::error::InvocationError;
use crate::sandbox::{arg, Sandbox};

/// What to play.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackRequest {
    /// File path or stream URL.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Seconds from the start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_position: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStatus {
    pub state: PlaybackState,
    /// Seconds.
    #[serde(default)]
    pub position: f64,
    /// Seconds; 0 when unknown.
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MediaPlayer {
    sandbox: Arc<Sandbox>,
}

impl MediaPlayer {
    pub(crate) fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }

    pub fn sandbox(&self) -> &Arc<Sandbox> {
        &self.sandbox
    }

    pub async fn play(&self, request: &PlaybackRequest) -> Result<(), InvocationError> {
        self.command("play", vec![arg(request)?]).await
    }

    pub async fn pause(&self) -> Result<(), InvocationError> {
        self.command("pause", vec![]).await
    }

    pub async fn resume(&self) -> Result<(), InvocationError> {
        self.command("resume", vec![]).await
    }

    pub async fn seek(&self, position: f64) -> Result<(), InvocationError> {
        if !position.is_finite() || position < 0.0 {
            return Err(InvocationError::Marshal(format!(
                "seek position must be a non-negative number, got {position}"
            )));
        }
        self.command("seek", vec![arg(&position)?]).await
    }

    pub async fn stop(&self) -> Result<(), InvocationError> {
        self.command("stop", vec![]).await
    }

    pub async fn status(&self) -> Result<PlaybackStatus, InvocationError> {
        self.sandbox.invoke_as("getStatus", vec![]).await
    }

    /// Commands return nothing useful; any result is accepted.
    async fn command(&self, function: &str, args: Vec<serde_json::Value>) -> Result<(), InvocationError> {
        self.sandbox
            .invoke_as::<IgnoredAny>(function, args)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::sandbox;
    use crate::manifest::Language;

    const PLAYER: &str = r#"
        let state = { state: "idle", position: 0 };
        function play(request) { state = { state: "playing", position: request.startPosition || 0, path: request.path }; }
        function pause() { state.state = "paused"; }
        function resume() { state.state = "playing"; }
        function seek(position) { state.position = position; return true; }
        function stop() { state = { state: "stopped", position: 0 }; }
        function getStatus() { return state; }
    "#;

    async fn player(source: &str) -> MediaPlayer {
        MediaPlayer::new(sandbox("player", Language::Javascript, source).await)
    }

    #[tokio::test]
    async fn test_player_lifecycle() {
        let player = player(PLAYER).await;
        assert_eq!(player.status().await.unwrap().state, PlaybackState::Idle);

        player
            .play(&PlaybackRequest {
                path: "/media/ep1.mkv".into(),
                title: None,
                start_position: Some(12.5),
            })
            .await
            .unwrap();
        let status = player.status().await.unwrap();
        assert_eq!(status.state, PlaybackState::Playing);
        assert_eq!(status.position, 12.5);
        assert_eq!(status.path.as_deref(), Some("/media/ep1.mkv"));

        player.pause().await.unwrap();
        player.seek(30.0).await.unwrap();
        let status = player.status().await.unwrap();
        assert_eq!(status.state, PlaybackState::Paused);
        assert_eq!(status.position, 30.0);

        player.resume().await.unwrap();
        player.stop().await.unwrap();
        assert_eq!(player.status().await.unwrap().state, PlaybackState::Stopped);
    }

    #[tokio::test]
    async fn test_wrong_status_shape_is_invocation_error() {
        let source = PLAYER.replace("function getStatus() { return state; }", "function getStatus() { return 42; }");
        let player = player(&source).await;
        let err = player.status().await.unwrap_err();
        assert!(matches!(err, InvocationError::ReturnType { .. }));
    }

    #[tokio::test]
    async fn test_seek_rejects_nan() {
        let player = player(PLAYER).await;
        assert!(matches!(
            player.seek(f64::NAN).await.unwrap_err(),
            InvocationError::Marshal(_)
        ));
    }
}
