//! Extension bank: the live extensions, keyed by id.
//!
//! Lookups clone an `Arc<BankEntry>` out of the map and release the lock
//! before any call into a sandbox, so a slow extension never blocks readers
//! or a concurrent replace.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::adapters::{
    AnimeTorrentProvider, Extension, MangaProvider, MediaPlayer, OnlineStreamProvider,
};
use crate::error::ExtensionError;
use crate::manifest::{ExtensionInfo, ExtensionType};

/// A registered extension with its descriptor metadata.
#[derive(Debug)]
pub struct BankEntry {
    pub info: ExtensionInfo,
    pub extension: Extension,
}

impl BankEntry {
    pub fn new(info: ExtensionInfo, extension: Extension) -> Self {
        Self { info, extension }
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn extension_type(&self) -> ExtensionType {
        self.extension.extension_type()
    }
}

#[derive(Debug, Default)]
pub struct ExtensionBank {
    entries: RwLock<HashMap<String, Arc<BankEntry>>>,
}

impl ExtensionBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `entry`, replacing any entry with the same id. The replaced
    /// entry is returned after the lock is released; its sandbox shuts down
    /// once the last in-flight call drops its handle.
    pub async fn set(&self, entry: BankEntry) -> Option<Arc<BankEntry>> {
        let id = entry.id().to_owned();
        let previous = {
            let mut entries = self.entries.write().await;
            entries.insert(id.clone(), Arc::new(entry))
        };
        if previous.is_some() {
            tracing::info!(extension = %id, "extension replaced");
        }
        previous
    }

    pub async fn get(&self, id: &str) -> Option<Arc<BankEntry>> {
        self.entries.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<BankEntry>> {
        let removed = self.entries.write().await.remove(id);
        if removed.is_some() {
            tracing::info!(extension = %id, "extension removed");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Snapshot of every entry of `extension_type`, sorted by id.
    pub async fn all_of_type(&self, extension_type: ExtensionType) -> Vec<Arc<BankEntry>> {
        let mut found: Vec<Arc<BankEntry>> = self
            .entries
            .read()
            .await
            .values()
            .filter(|e| e.extension_type() == extension_type)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id().cmp(b.id()));
        found
    }

    /// Metadata of every entry, sorted by id.
    pub async fn list(&self) -> Vec<ExtensionInfo> {
        let mut infos: Vec<ExtensionInfo> = self
            .entries
            .read()
            .await
            .values()
            .map(|e| e.info.clone())
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    async fn require(&self, id: &str) -> Result<Arc<BankEntry>, ExtensionError> {
        self.get(id)
            .await
            .ok_or_else(|| ExtensionError::NotFound(id.to_owned()))
    }

    pub async fn media_player(&self, id: &str) -> Result<MediaPlayer, ExtensionError> {
        let entry = self.require(id).await?;
        match &entry.extension {
            Extension::MediaPlayer(player) => Ok(player.clone()),
            other => Err(wrong_type(id, ExtensionType::MediaPlayer, other)),
        }
    }

    pub async fn manga_provider(&self, id: &str) -> Result<MangaProvider, ExtensionError> {
        let entry = self.require(id).await?;
        match &entry.extension {
            Extension::MangaProvider(provider) => Ok(provider.clone()),
            other => Err(wrong_type(id, ExtensionType::MangaProvider, other)),
        }
    }

    pub async fn onlinestream_provider(
        &self,
        id: &str,
    ) -> Result<OnlineStreamProvider, ExtensionError> {
        let entry = self.require(id).await?;
        match &entry.extension {
            Extension::OnlineStreamProvider(provider) => Ok(provider.clone()),
            other => Err(wrong_type(id, ExtensionType::OnlineStreamProvider, other)),
        }
    }

    pub async fn torrent_provider(&self, id: &str) -> Result<AnimeTorrentProvider, ExtensionError> {
        let entry = self.require(id).await?;
        match &entry.extension {
            Extension::AnimeTorrentProvider(provider) => Ok(provider.clone()),
            other => Err(wrong_type(id, ExtensionType::AnimeTorrentProvider, other)),
        }
    }

    /// Every torrent provider, sorted by id.
    pub async fn torrent_providers(&self) -> Vec<AnimeTorrentProvider> {
        self.all_of_type(ExtensionType::AnimeTorrentProvider)
            .await
            .iter()
            .filter_map(|entry| match &entry.extension {
                Extension::AnimeTorrentProvider(provider) => Some(provider.clone()),
                _ => None,
            })
            .collect()
    }
}

fn wrong_type(id: &str, expected: ExtensionType, actual: &Extension) -> ExtensionError {
    ExtensionError::WrongType {
        id: id.to_owned(),
        expected: expected.as_str(),
        actual: actual.extension_type().as_str(),
    }
}
