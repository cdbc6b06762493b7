//! Extension descriptor parsing and validation.
//!
//! A descriptor declares an extension's id, source language, contract type
//! and source payload. Descriptors arrive as JSON over the API or as
//! `*.json` / `*.toml` manifests in an extension directory; a manifest may
//! keep its payload in a sibling file referenced by `payloadPath`.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::LoadError;

/// Largest accepted source payload.
pub const MAX_PAYLOAD_BYTES: usize = 4 * 1024 * 1024;

/// Source language of an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Rhai,
    #[serde(alias = "js")]
    Javascript,
    #[serde(alias = "ts")]
    Typescript,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Rhai => "rhai",
            Language::Javascript => "javascript",
            Language::Typescript => "typescript",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contract an extension implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtensionType {
    #[serde(rename = "mediaplayer")]
    MediaPlayer,
    #[serde(rename = "anime-torrent-provider")]
    AnimeTorrentProvider,
    #[serde(rename = "manga-provider")]
    MangaProvider,
    #[serde(rename = "onlinestream-provider")]
    OnlineStreamProvider,
}

impl ExtensionType {
    pub const ALL: [ExtensionType; 4] = [
        ExtensionType::MediaPlayer,
        ExtensionType::AnimeTorrentProvider,
        ExtensionType::MangaProvider,
        ExtensionType::OnlineStreamProvider,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExtensionType::MediaPlayer => "mediaplayer",
            ExtensionType::AnimeTorrentProvider => "anime-torrent-provider",
            ExtensionType::MangaProvider => "manga-provider",
            ExtensionType::OnlineStreamProvider => "onlinestream-provider",
        }
    }
}

impl fmt::Display for ExtensionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to load one extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionDescriptor {
    pub id: String,
    pub language: Language,
    #[serde(rename = "type")]
    pub extension_type: ExtensionType,
    #[serde(default)]
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Descriptor metadata kept alongside a live extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionInfo {
    pub id: String,
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub language: Language,
    #[serde(rename = "type")]
    pub extension_type: ExtensionType,
    pub permissions: Vec<String>,
}

// ─── Validation helpers ─────────────────────────────────────────────

/// Validate an extension id against `^[a-z0-9][a-z0-9-_.]{1,63}$`.
fn validate_id(id: &str) -> Result<(), LoadError> {
    let len = id.len();
    if !(2..=64).contains(&len) {
        return Err(LoadError::InvalidDescriptor(format!(
            "id must be 2-64 characters, got {len}"
        )));
    }

    let mut chars = id.chars();
    if let Some(first) = chars.next() {
        if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
            return Err(LoadError::InvalidDescriptor(format!(
                "id must start with a lowercase letter or digit, got '{first}'"
            )));
        }
    }

    for ch in chars {
        if !ch.is_ascii_lowercase() && !ch.is_ascii_digit() && !matches!(ch, '-' | '_' | '.') {
            return Err(LoadError::InvalidDescriptor(format!(
                "id contains invalid character '{ch}'"
            )));
        }
    }

    Ok(())
}

/// Validate that a path is relative and has no `..` components.
fn validate_path_safety(path: &str, field_name: &str) -> Result<(), LoadError> {
    let p = Path::new(path);
    if p.is_absolute() {
        return Err(LoadError::InvalidDescriptor(format!(
            "{field_name} must be a relative path, got absolute: '{path}'"
        )));
    }
    if p.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(LoadError::InvalidDescriptor(format!(
            "{field_name} must not contain '..': '{path}'"
        )));
    }
    Ok(())
}

fn validate_length(value: Option<&str>, field_name: &str, max: usize) -> Result<(), LoadError> {
    if let Some(value) = value {
        let len = value.len();
        if len == 0 || len > max {
            return Err(LoadError::InvalidDescriptor(format!(
                "{field_name} must be 1-{max} characters, got {len}"
            )));
        }
    }
    Ok(())
}

impl ExtensionDescriptor {
    pub fn from_json(json: &str) -> Result<Self, LoadError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self, LoadError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Validate all fields. The payload must already be resolved.
    pub fn validate(&self) -> Result<(), LoadError> {
        validate_id(&self.id)?;

        if let Some(ref version) = self.version {
            semver::Version::parse(version)?;
        }
        validate_length(self.name.as_deref(), "name", 100)?;
        validate_length(self.description.as_deref(), "description", 500)?;
        validate_length(self.author.as_deref(), "author", 255)?;

        for permission in &self.permissions {
            if permission.is_empty() || permission.contains(char::is_whitespace) {
                return Err(LoadError::InvalidDescriptor(format!(
                    "invalid permission '{permission}'"
                )));
            }
        }

        if let Some(ref path) = self.payload_path {
            validate_path_safety(path, "payloadPath")?;
        }
        if self.payload.trim().is_empty() {
            return Err(LoadError::InvalidDescriptor("payload is empty".into()));
        }
        if self.payload.len() > MAX_PAYLOAD_BYTES {
            return Err(LoadError::InvalidDescriptor(format!(
                "payload exceeds {MAX_PAYLOAD_BYTES} bytes"
            )));
        }

        Ok(())
    }

    /// Parse and validate a JSON descriptor with an inline payload.
    pub fn parse_and_validate(json: &str) -> Result<Self, LoadError> {
        let descriptor = Self::from_json(json)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Read a manifest file, resolving `payloadPath` against its directory.
    pub async fn read_file(path: &Path) -> Result<Self, LoadError> {
        let text = tokio::fs::read_to_string(path).await?;
        let mut descriptor = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&text)?,
            Some("json") => Self::from_json(&text)?,
            other => {
                return Err(LoadError::InvalidDescriptor(format!(
                    "unsupported manifest format: {}",
                    other.unwrap_or("<none>")
                )))
            }
        };

        if let Some(ref payload_path) = descriptor.payload_path {
            validate_path_safety(payload_path, "payloadPath")?;
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            let payload_file = base.join(payload_path);
            let size = tokio::fs::metadata(&payload_file).await?.len();
            if size > MAX_PAYLOAD_BYTES as u64 {
                return Err(LoadError::InvalidDescriptor(format!(
                    "payload exceeds {MAX_PAYLOAD_BYTES} bytes"
                )));
            }
            descriptor.payload = tokio::fs::read_to_string(payload_file).await?;
        }

        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn info(&self) -> ExtensionInfo {
        ExtensionInfo {
            id: self.id.clone(),
            name: self.display_name().to_owned(),
            version: self.version.clone(),
            description: self.description.clone(),
            author: self.author.clone(),
            language: self.language,
            extension_type: self.extension_type,
            permissions: self.permissions.clone(),
        }
    }
}

/// Read every `*.json` / `*.toml` manifest in `dir`, sorted by file name.
/// Each manifest is reported with its own outcome.
pub async fn read_dir(
    dir: &Path,
) -> Result<Vec<(PathBuf, Result<ExtensionDescriptor, LoadError>)>, LoadError> {
    let mut paths = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_manifest = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("json" | "toml")
        );
        if is_manifest && entry.file_type().await?.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut manifests = Vec::with_capacity(paths.len());
    for path in paths {
        let descriptor = ExtensionDescriptor::read_file(&path).await;
        manifests.push((path, descriptor));
    }
    Ok(manifests)
}

// ─── Tests ──────────────────────────────────────────────────────────
