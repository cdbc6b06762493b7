//! Anime torrent provider extensions.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::InvocationError;
use crate::sandbox::{arg, Sandbox};

/// The media a search is about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    pub id: i64,
    #[serde(default)]
    pub id_mal: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub english_title: Option<String>,
    #[serde(default)]
    pub romaji_title: Option<String>,
    #[serde(default)]
    pub episode_count: Option<i32>,
    #[serde(default)]
    pub absolute_season_offset: Option<i32>,
    #[serde(default)]
    pub synonyms: Vec<String>,
    #[serde(default)]
    pub is_adult: bool,
    #[serde(default)]
    pub start_year: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimeSearchOptions {
    pub media: Media,
    pub query: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimeSmartSearchOptions {
    pub media: Media,
    pub query: String,
    pub batch: bool,
    pub episode_number: i32,
    pub resolution: String,
    #[serde(rename = "anidbAID")]
    pub anidb_aid: i64,
    #[serde(rename = "anidbEID")]
    pub anidb_eid: i64,
    pub best_releases: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnimeTorrent {
    pub provider: String,
    pub name: String,
    pub date: String,
    /// Bytes; 0 when the provider only reports `formatted_size`.
    pub size: i64,
    pub formatted_size: String,
    pub seeders: i32,
    pub leechers: i32,
    pub download_count: i32,
    pub link: String,
    pub download_url: String,
    pub magnet_link: String,
    pub info_hash: String,
    pub resolution: String,
    pub is_batch: bool,
    pub episode_number: i32,
    pub release_group: String,
    pub is_best_release: bool,
    pub confirmed: bool,
}

impl AnimeTorrent {
    /// Size in bytes, falling back to parsing `formatted_size`.
    pub fn size_in_bytes(&self) -> i64 {
        if self.size > 0 {
            return self.size;
        }
        parse_size(&self.formatted_size).unwrap_or(0)
    }
}

/// Parse a human size such as `"1.2 GiB"` or `"700MB"` into bytes.
pub fn parse_size(text: &str) -> Option<i64> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let number: f64 = number.parse().ok()?;

    let multiplier: f64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" | "bytes" => 1.0,
        "kib" => 1024.0,
        "mib" => 1024.0 * 1024.0,
        "gib" => 1024.0 * 1024.0 * 1024.0,
        "tib" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "kb" => 1e3,
        "mb" => 1e6,
        "gb" => 1e9,
        "tb" => 1e12,
        _ => return None,
    };
    Some((number * multiplier).round() as i64)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TorrentProviderSettings {
    pub can_smart_search: bool,
    pub smart_search_filters: Vec<String>,
    pub supports_adult: bool,
    /// `"main"` or `"special"`.
    #[serde(rename = "type")]
    pub provider_type: String,
}

#[derive(Debug, Clone)]
pub struct AnimeTorrentProvider {
    sandbox: Arc<Sandbox>,
}

impl AnimeTorrentProvider {
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
        options: &AnimeSearchOptions,
    ) -> Result<Vec<AnimeTorrent>, InvocationError> {
        self.torrents("search", vec![arg(options)?]).await
    }

    pub async fn smart_search(
        &self,
        options: &AnimeSmartSearchOptions,
    ) -> Result<Vec<AnimeTorrent>, InvocationError> {
        self.torrents("smartSearch", vec![arg(options)?]).await
    }

    pub async fn latest(&self) -> Result<Vec<AnimeTorrent>, InvocationError> {
        self.torrents("getLatest", vec![]).await
    }

    pub async fn torrent_info_hash(
        &self,
        torrent: &AnimeTorrent,
    ) -> Result<String, InvocationError> {
        self.sandbox
            .invoke_as("getTorrentInfoHash", vec![arg(torrent)?])
            .await
    }

    pub async fn torrent_magnet_link(
        &self,
        torrent: &AnimeTorrent,
    ) -> Result<String, InvocationError> {
        self.sandbox
            .invoke_as("getTorrentMagnetLink", vec![arg(torrent)?])
            .await
    }

    pub async fn settings(&self) -> Result<TorrentProviderSettings, InvocationError> {
        self.sandbox.invoke_as("getSettings", vec![]).await
    }

    /// Torrents are stamped with this provider's id.
    async fn torrents(
        &self,
        function: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<Vec<AnimeTorrent>, InvocationError> {
        let mut torrents: Vec<AnimeTorrent> = self.sandbox.invoke_as(function, args).await?;
        for torrent in &mut torrents {
            torrent.provider = self.id().to_owned();
        }
        Ok(torrents)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::adapters::testing::sandbox;
    use crate::manifest::Language;

    const NYAA: &str = r#"
        fn search(opts) {
            [#{ name: "[Group] " + opts.query + " - 01 [1080p].mkv", formattedSize: "1.2 GiB",
                seeders: 10, infoHash: "abc", resolution: "1080p" }]
        }
        fn smartSearch(opts) {
            if opts.batch { [] } else { [#{ name: opts.query, episodeNumber: opts.episodeNumber }] }
        }
        fn getTorrentInfoHash(t) { t.infoHash }
        fn getTorrentMagnetLink(t) { "magnet:?xt=urn:btih:" + t.infoHash }
        fn getLatest() { [] }
        fn getSettings() { #{ canSmartSearch: true, supportsAdult: false, "type": "main" } }
    "#;

    async fn provider() -> AnimeTorrentProvider {
        AnimeTorrentProvider::new(sandbox("nyaa", Language::Rhai, NYAA).await)
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1.2 GiB"), Some(1_288_490_189));
        assert_eq!(parse_size("700 MiB"), Some(734_003_200));
        assert_eq!(parse_size("1.5GB"), Some(1_500_000_000));
        assert_eq!(parse_size("512 B"), Some(512));
        assert_eq!(parse_size("12"), Some(12));
        assert_eq!(parse_size("lots"), None);
        assert_eq!(parse_size("3 parsecs"), None);
    }

    #[test]
    fn test_size_in_bytes_prefers_explicit_size() {
        let torrent = AnimeTorrent {
            size: 42,
            formatted_size: "1 GiB".into(),
            ..AnimeTorrent::default()
        };
        assert_eq!(torrent.size_in_bytes(), 42);
        let torrent = AnimeTorrent {
            formatted_size: "1 KiB".into(),
            ..AnimeTorrent::default()
        };
        assert_eq!(torrent.size_in_bytes(), 1024);
    }

    #[test]
    fn test_smart_search_options_wire_names() {
        let value = serde_json::to_value(AnimeSmartSearchOptions::default()).unwrap();
        assert!(value.get("anidbAID").is_some());
        assert!(value.get("episodeNumber").is_some());
        assert!(value.get("bestReleases").is_some());
    }

    #[tokio::test]
    async fn test_search_stamps_provider() {
        let provider = provider().await;
        let torrents = provider
            .search(&AnimeSearchOptions {
                media: Media::default(),
                query: "Frieren".into(),
            })
            .await
            .unwrap();
        assert_eq!(torrents.len(), 1);
        assert_eq!(torrents[0].provider, "nyaa");
        assert_eq!(torrents[0].seeders, 10);
        assert_eq!(torrents[0].size_in_bytes(), 1_288_490_189);
    }

    #[tokio::test]
    async fn test_smart_search_and_links() {
        let provider = provider().await;
        let options = AnimeSmartSearchOptions {
            query: "Frieren".into(),
            episode_number: 3,
            ..AnimeSmartSearchOptions::default()
        };
        let torrents = provider.smart_search(&options).await.unwrap();
        assert_eq!(torrents[0].episode_number, 3);

        let torrent = AnimeTorrent {
            info_hash: "abc".into(),
            ..AnimeTorrent::default()
        };
        assert_eq!(provider.torrent_info_hash(&torrent).await.unwrap(), "abc");
        assert_eq!(
            provider.torrent_magnet_link(&torrent).await.unwrap(),
            "magnet:?xt=urn:btih:abc"
        );
        assert!(provider.latest().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_settings() {
        let settings = provider().await.settings().await.unwrap();
        assert!(settings.can_smart_search);
        assert_eq!(settings.provider_type, "main");
        assert_eq!(
            serde_json::to_value(&settings).unwrap()["type"],
            json!("main")
        );
    }
}
