//! Online streaming provider extensions.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::InvocationError;
use crate::sandbox::{arg, Sandbox};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSearchOptions {
    pub query: String,
    pub dub: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubOrDub {
    #[default]
    #[serde(rename = "sub")]
    Sub,
    #[serde(rename = "dub")]
    Dub,
    #[serde(rename = "both")]
    Both,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub url: String,
    pub sub_or_dub: SubOrDub,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EpisodeDetails {
    pub provider: String,
    pub id: String,
    pub number: i32,
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoSubtitle {
    pub id: String,
    pub url: String,
    pub language: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoSource {
    pub url: String,
    /// `"mp4"`, `"m3u8"` and so on.
    #[serde(rename = "type")]
    pub source_type: String,
    pub quality: String,
    pub subtitles: Vec<VideoSubtitle>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EpisodeServer {
    pub provider: String,
    pub server: String,
    pub headers: HashMap<String, String>,
    pub video_sources: Vec<VideoSource>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamingSettings {
    pub episode_servers: Vec<String>,
    pub supports_dub: bool,
}

#[derive(Debug, Clone)]
pub struct OnlineStreamProvider {
    sandbox: Arc<Sandbox>,
}

impl OnlineStreamProvider {
    pub(crate) fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }

    pub fn sandbox(&self) -> &Arc<Sandbox> {
        &self.sandbox
    }

    pub fn id(&self) -> &str {
        self.sandbox.id()
    }

    pub async fn search(
        &self,
        options: &StreamSearchOptions,
    ) -> Result<Vec<SearchResult>, InvocationError> {
        self.sandbox.invoke_as("search", vec![arg(options)?]).await
    }

    pub async fn find_episodes(&self, id: &str) -> Result<Vec<EpisodeDetails>, InvocationError> {
        let mut episodes: Vec<EpisodeDetails> =
            self.sandbox.invoke_as("findEpisodes", vec![arg(&id)?]).await?;
        for episode in &mut episodes {
            episode.provider = self.id().to_owned();
        }
        Ok(episodes)
    }

    /// Resolve the video sources of `episode` on `server`. An empty server
    /// name lets the extension pick its default.
    pub async fn find_episode_server(
        &self,
        episode: &EpisodeDetails,
        server: &str,
    ) -> Result<EpisodeServer, InvocationError> {
        let mut found: EpisodeServer = self
            .sandbox
            .invoke_as("findEpisodeServer", vec![arg(episode)?, arg(&server)?])
            .await?;
        found.provider = self.id().to_owned();
        Ok(found)
    }

    pub async fn settings(&self) -> Result<StreamingSettings, InvocationError> {
        self.sandbox.invoke_as("getSettings", vec![]).await
    }
}
