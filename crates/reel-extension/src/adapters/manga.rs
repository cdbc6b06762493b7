//! Manga provider extensions.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::InvocationError;
use crate::sandbox::{arg, Sandbox};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MangaSearchOptions {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MangaSearchResult {
    pub provider: String,
    pub id: String,
    pub title: String,
    pub synonyms: Vec<String>,
    pub year: Option<i32>,
    pub image: String,
    /// How well the result matches the query, 0 to 1.
    pub search_rating: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChapterDetails {
    pub provider: String,
    pub id: String,
    pub url: String,
    pub title: String,
    /// Chapter number as printed, e.g. `"10.5"`.
    pub chapter: String,
    pub index: u32,
    pub rating: Option<i32>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChapterPage {
    pub provider: String,
    pub url: String,
    pub index: u32,
    /// Headers the image host expects, e.g. a referer.
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct MangaProvider {
    sandbox: Arc<Sandbox>,
}

impl MangaProvider {
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
        options: &MangaSearchOptions,
    ) -> Result<Vec<MangaSearchResult>, InvocationError> {
        let mut results: Vec<MangaSearchResult> =
            self.sandbox.invoke_as("search", vec![arg(options)?]).await?;
        for result in &mut results {
            result.provider = self.id().to_owned();
        }
        Ok(results)
    }

    pub async fn find_chapters(
        &self,
        manga_id: &str,
    ) -> Result<Vec<ChapterDetails>, InvocationError> {
        let mut chapters: Vec<ChapterDetails> =
            self.sandbox.invoke_as("findChapters", vec![arg(&manga_id)?]).await?;
        for chapter in &mut chapters {
            chapter.provider = self.id().to_owned();
        }
        Ok(chapters)
    }

    /// Pages come back ordered by `index`.
    pub async fn find_chapter_pages(
        &self,
        chapter_id: &str,
    ) -> Result<Vec<ChapterPage>, InvocationError> {
        let mut pages: Vec<ChapterPage> = self
            .sandbox
            .invoke_as("findChapterPages", vec![arg(&chapter_id)?])
            .await?;
        for page in &mut pages {
            page.provider = self.id().to_owned();
        }
        pages.sort_by_key(|p| p.index);
        Ok(pages)
    }
}
