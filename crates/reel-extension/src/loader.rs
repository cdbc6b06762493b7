//! Extension loader: descriptor in, registered extension out.
//!
//! A load either installs a fully checked extension into the bank or fails
//! with a [`LoadError`] and leaves the bank untouched.

use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::adapters::Extension;
use crate::backend::Backends;
use crate::bank::{BankEntry, ExtensionBank};
use crate::error::{ExtensionError, LoadError};
use crate::manifest::{self, ExtensionDescriptor, ExtensionInfo};
use crate::sandbox::{Sandbox, SandboxConfig, SandboxTracker};

/// Outcome of loading one descriptor.
#[derive(Debug)]
pub struct LoadReport {
    pub id: String,
    pub outcome: Result<ExtensionInfo, LoadError>,
}

impl LoadReport {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

#[derive(Debug, Clone)]
pub struct ExtensionLoader {
    bank: Arc<ExtensionBank>,
    backends: Backends,
    config: SandboxConfig,
    tracker: SandboxTracker,
}

impl ExtensionLoader {
    pub fn new(bank: Arc<ExtensionBank>, backends: Backends, config: SandboxConfig) -> Self {
        Self {
            bank,
            backends,
            config,
            tracker: SandboxTracker::new(),
        }
    }

    /// Loader with every compiled-in backend and limits from the environment.
    pub fn from_env(bank: Arc<ExtensionBank>) -> Self {
        Self::new(bank, Backends::default(), SandboxConfig::from_env())
    }

    pub fn bank(&self) -> &Arc<ExtensionBank> {
        &self.bank
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    pub fn tracker(&self) -> &SandboxTracker {
        &self.tracker
    }

    /// Validate, evaluate, contract-check and register one extension.
    pub async fn load(&self, descriptor: &ExtensionDescriptor) -> Result<ExtensionInfo, LoadError> {
        descriptor.validate()?;
        let backend = self.backends.get(descriptor.language)?;

        let sandbox = Sandbox::spawn(
            &descriptor.id,
            backend,
            descriptor.payload.clone(),
            self.config.clone(),
            &self.tracker,
        )
        .await?;
        let extension = Extension::wrap(descriptor.extension_type, sandbox)?;

        let info = descriptor.info();
        self.bank.set(BankEntry::new(info.clone(), extension)).await;

        tracing::info!(
            extension = %info.id,
            language = %info.language,
            kind = %info.extension_type,
            "extension loaded"
        );
        Ok(info)
    }

    /// Load descriptors concurrently; one report per descriptor, sorted by id.
    pub async fn load_all(&self, descriptors: Vec<ExtensionDescriptor>) -> Vec<LoadReport> {
        let mut tasks = JoinSet::new();
        for descriptor in descriptors {
            let loader = self.clone();
            tasks.spawn(async move {
                let outcome = loader.load(&descriptor).await;
                if let Err(ref e) = outcome {
                    tracing::error!(extension = %descriptor.id, "failed to load extension: {e}");
                }
                LoadReport {
                    id: descriptor.id,
                    outcome,
                }
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => tracing::error!("extension load task failed: {e}"),
            }
        }
        reports.sort_by(|a, b| a.id.cmp(&b.id));
        reports
    }

    /// Load every manifest in `dir`. Manifests that fail to read or
    /// validate are logged and skipped.
    pub async fn load_dir(&self, dir: &Path) -> Result<Vec<LoadReport>, LoadError> {
        let mut descriptors = Vec::new();
        for (path, descriptor) in manifest::read_dir(dir).await? {
            match descriptor {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(e) => {
                    tracing::warn!(path = %path.display(), "skipping invalid manifest: {e}");
                }
            }
        }
        tracing::info!(dir = %dir.display(), count = descriptors.len(), "loading extensions");
        Ok(self.load_all(descriptors).await)
    }

    /// Remove an extension from the bank. Its sandbox stops once in-flight
    /// calls finish.
    pub async fn unload(&self, id: &str) -> Result<ExtensionInfo, ExtensionError> {
        let entry = self
            .bank
            .remove(id)
            .await
            .ok_or_else(|| ExtensionError::NotFound(id.to_owned()))?;
        Ok(entry.info.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{ExtensionType, Language};

    fn descriptor(
        id: &str,
        language: Language,
        extension_type: ExtensionType,
        payload: &str,
    ) -> ExtensionDescriptor {
        ExtensionDescriptor::from_json(
            &serde_json::json!({
                "id": id,
                "language": language,
                "type": extension_type,
                "payload": payload,
            })
            .to_string(),
        )
        .unwrap()
    }

    const MANGA: &str =
        "fn search(q) { [] } fn findChapters(id) { [] } fn findChapterPages(id) { [] }";

    fn loader() -> ExtensionLoader {
        ExtensionLoader::new(
            Arc::new(ExtensionBank::new()),
            Backends::default(),
            SandboxConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_load_registers() {
        let loader = loader();
        let info = loader
            .load(&descriptor("reader", Language::Rhai, ExtensionType::MangaProvider, MANGA))
            .await
            .unwrap();
        assert_eq!(info.name, "reader");
        assert!(loader.bank().manga_provider("reader").await.is_ok());
    }

    #[tokio::test]
    async fn test_load_errors_leave_bank_empty() {
        let loader = loader();

        let err = loader
            .load(&descriptor(
                "broken",
                Language::Rhai,
                ExtensionType::MangaProvider,
                "fn search( {",
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::CompileError(_)));

        let err = loader
            .load(&descriptor(
                "partial",
                Language::Rhai,
                ExtensionType::MangaProvider,
                "fn search(q) { [] }",
            ))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "missing export: findChapters");

        let err = loader
            .load(&descriptor("x", Language::Rhai, ExtensionType::MangaProvider, MANGA))
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::InvalidDescriptor(_)));

        assert!(loader.bank().is_empty().await);
    }

    #[tokio::test]
    async fn test_unsupported_language() {
        let loader = ExtensionLoader::new(
            Arc::new(ExtensionBank::new()),
            Backends::empty(),
            SandboxConfig::default(),
        );
        let err = loader
            .load(&descriptor("reader", Language::Rhai, ExtensionType::MangaProvider, MANGA))
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedLanguage(_)));
    }

    #[tokio::test]
    async fn test_load_all_reports_each() {
        let loader = loader();
        let reports = loader
            .load_all(vec![
                descriptor("b-reader", Language::Rhai, ExtensionType::MangaProvider, MANGA),
                descriptor("a-broken", Language::Rhai, ExtensionType::MangaProvider, "fn ("),
            ])
            .await;
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].id, "a-broken");
        assert!(!reports[0].is_ok());
        assert!(reports[1].is_ok());
        assert_eq!(loader.bank().len().await, 1);
    }

    #[tokio::test]
    async fn test_unload() {
        let loader = loader();
        loader
            .load(&descriptor("reader", Language::Rhai, ExtensionType::MangaProvider, MANGA))
            .await
            .unwrap();
        assert_eq!(loader.unload("reader").await.unwrap().id, "reader");
        assert!(matches!(
            loader.unload("reader").await.unwrap_err(),
            ExtensionError::NotFound(_)
        ));
    }
}
