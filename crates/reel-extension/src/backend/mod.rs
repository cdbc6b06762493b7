//! Language backends.
//!
//! A [`Backend`] turns source text into an [`Engine`]: a live interpreter
//! with the capability bindings installed, the source evaluated and the
//! export table captured. Engines are not `Send`; they are created and
//! driven on the owning sandbox thread.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::contract::ExportTable;
use crate::error::{InvocationError, LoadError};
use crate::manifest::Language;
use crate::sandbox::SandboxConfig;

pub mod quickjs;
pub mod rhai;
#[cfg(feature = "typescript")]
pub mod typescript;

/// What an engine needs to know about the extension it hosts.
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub extension_id: Arc<str>,
    pub config: SandboxConfig,
}

pub trait Backend: Send + Sync {
    fn language(&self) -> Language;

    /// Build an engine for `source`. Evaluation faults are
    /// [`LoadError::CompileError`].
    fn create(&self, source: &str, ctx: &EngineContext) -> Result<Box<dyn Engine>, LoadError>;
}

pub trait Engine {
    fn exports(&self) -> &ExportTable;

    /// Call an exported function. Arguments and result are JSON values;
    /// the engine aborts the call once `deadline` has passed.
    fn call(
        &mut self,
        function: &str,
        args: &[Value],
        deadline: Instant,
    ) -> Result<Value, InvocationError>;
}

/// Language -> backend lookup table.
#[derive(Clone)]
pub struct Backends {
    table: HashMap<Language, Arc<dyn Backend>>,
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field("languages", &self.languages())
            .finish()
    }
}

impl Backends {
    pub fn empty() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    pub fn register(&mut self, backend: Arc<dyn Backend>) {
        self.table.insert(backend.language(), backend);
    }

    pub fn get(&self, language: Language) -> Result<Arc<dyn Backend>, LoadError> {
        self.table
            .get(&language)
            .cloned()
            .ok_or_else(|| LoadError::UnsupportedLanguage(language.to_string()))
    }

    pub fn languages(&self) -> Vec<Language> {
        let mut languages: Vec<_> = self.table.keys().copied().collect();
        languages.sort_by_key(|l| l.as_str());
        languages
    }
}

impl Default for Backends {
    /// Every backend compiled into this build.
    fn default() -> Self {
        let mut backends = Self::empty();
        backends.register(Arc::new(rhai::RhaiBackend));
        backends.register(Arc::new(quickjs::QuickJsBackend));
        #[cfg(feature = "typescript")]
        backends.register(Arc::new(typescript::TypeScriptBackend));
        backends
    }
}

/// Classify an engine error message the way both engines report limits.
pub(crate) fn is_resource_error(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("out of memory")
        || lower.contains("stack overflow")
        || lower.contains("maximum call stack")
}
