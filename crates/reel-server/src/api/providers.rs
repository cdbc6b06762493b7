//! Search endpoints backed by provider extensions.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use reel_extension::adapters::manga::{MangaSearchOptions, MangaSearchResult};
use reel_extension::adapters::onlinestream::{SearchResult, StreamSearchOptions};
use reel_extension::adapters::torrent::{
    AnimeSearchOptions, AnimeSmartSearchOptions, AnimeTorrent, Media,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinSet;

use super::{extension_error, invocation_error, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TorrentSearchQuery {
    pub q: String,
    /// Episode number; switches providers to smart search.
    pub episode: Option<i32>,
    #[serde(default)]
    pub batch: bool,
    #[serde(default)]
    pub resolution: String,
}

#[derive(Debug, Serialize)]
pub struct TorrentSearchResponse {
    pub torrents: Vec<AnimeTorrent>,
    /// Provider id -> error message, for providers that failed.
    pub errors: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct MangaSearchQuery {
    pub q: String,
    pub year: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct StreamSearchQuery {
    pub q: String,
    #[serde(default)]
    pub dub: bool,
    pub year: Option<i32>,
}

fn empty_query() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "query must not be empty", "kind": "invalid_query" })),
    )
}

/// GET /api/torrents/search?q=&episode=: Search every torrent provider.
/// A failing provider is reported in `errors` and does not fail the search.
pub async fn search_torrents(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TorrentSearchQuery>,
) -> ApiResult<Json<TorrentSearchResponse>> {
    if query.q.trim().is_empty() {
        return Err(empty_query());
    }

    let media = Media {
        english_title: Some(query.q.clone()),
        ..Media::default()
    };
    let mut tasks = JoinSet::new();
    for provider in state.bank.torrent_providers().await {
        let media = media.clone();
        let q = query.q.clone();
        let smart = query.episode.map(|episode_number| AnimeSmartSearchOptions {
            media: media.clone(),
            query: q.clone(),
            batch: query.batch,
            episode_number,
            resolution: query.resolution.clone(),
            ..AnimeSmartSearchOptions::default()
        });
        tasks.spawn(async move {
            let result = match smart {
                Some(options) => provider.smart_search(&options).await,
                None => {
                    provider
                        .search(&AnimeSearchOptions { media, query: q })
                        .await
                }
            };
            (provider.id().to_owned(), result)
        });
    }

    let mut response = TorrentSearchResponse {
        torrents: Vec::new(),
        errors: BTreeMap::new(),
    };
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(torrents))) => response.torrents.extend(torrents),
            Ok((id, Err(e))) => {
                tracing::warn!(extension = %id, "torrent search failed: {e}");
                response.errors.insert(id, e.to_string());
            }
            Err(e) => tracing::error!("torrent search task failed: {e}"),
        }
    }
    response
        .torrents
        .sort_by(|a, b| b.seeders.cmp(&a.seeders).then_with(|| a.name.cmp(&b.name)));

    Ok(Json(response))
}

/// GET /api/manga/{id}/search?q=
pub async fn search_manga(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<MangaSearchQuery>,
) -> ApiResult<Json<Vec<MangaSearchResult>>> {
    if query.q.trim().is_empty() {
        return Err(empty_query());
    }
    let provider = state.bank.manga_provider(&id).await.map_err(extension_error)?;
    let results = provider
        .search(&MangaSearchOptions {
            query: query.q,
            year: query.year,
        })
        .await
        .map_err(invocation_error)?;
    Ok(Json(results))
}

/// GET /api/onlinestream/{id}/search?q=&dub=
pub async fn search_onlinestream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<StreamSearchQuery>,
) -> ApiResult<Json<Vec<SearchResult>>> {
    if query.q.trim().is_empty() {
        return Err(empty_query());
    }
    let provider = state
        .bank
        .onlinestream_provider(&id)
        .await
        .map_err(extension_error)?;
    let results = provider
        .search(&StreamSearchOptions {
            query: query.q,
            dub: query.dub,
            year: query.year,
        })
        .await
        .map_err(invocation_error)?;
    Ok(Json(results))
}
