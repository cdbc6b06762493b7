//! Export contracts, one per extension type.
//!
//! A contract lists the functions an extension of that type must export and
//! how many parameters the host passes to each. Contracts are checked once,
//! at load time, against the export table a backend captured.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::LoadError;
use crate::manifest::ExtensionType;

pub const CONTRACT_VERSION: u32 = 1;

/// Declared parameter count of an exported function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Called with exactly this many arguments (Rhai).
    Exact(usize),
    /// Declared parameters; extra or missing arguments are tolerated by the
    /// engine, but a function declaring more than the host passes is not
    /// accepted (JavaScript).
    Variadic(usize),
}

impl Arity {
    pub fn accepts(self, passed: usize) -> bool {
        match self {
            Arity::Exact(n) => n == passed,
            Arity::Variadic(declared) => declared <= passed,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{n}"),
            Arity::Variadic(n) => write!(f, "{n}+"),
        }
    }
}

/// Exported function name -> arity.
pub type ExportTable = BTreeMap<String, Arity>;

const MEDIA_PLAYER: &[(&str, usize)] = &[
    ("play", 1),
    ("pause", 0),
    ("resume", 0),
    ("seek", 1),
    ("stop", 0),
    ("getStatus", 0),
];

const ANIME_TORRENT_PROVIDER: &[(&str, usize)] = &[
    ("search", 1),
    ("smartSearch", 1),
    ("getTorrentInfoHash", 1),
    ("getTorrentMagnetLink", 1),
    ("getLatest", 0),
    ("getSettings", 0),
];

const MANGA_PROVIDER: &[(&str, usize)] = &[
    ("search", 1),
    ("findChapters", 1),
    ("findChapterPages", 1),
];

const ONLINESTREAM_PROVIDER: &[(&str, usize)] = &[
    ("search", 1),
    ("findEpisodes", 1),
    ("findEpisodeServer", 2),
    ("getSettings", 0),
];

/// Required exports and the number of arguments the host passes to each.
pub fn required_exports(extension_type: ExtensionType) -> &'static [(&'static str, usize)] {
    match extension_type {
        ExtensionType::MediaPlayer => MEDIA_PLAYER,
        ExtensionType::AnimeTorrentProvider => ANIME_TORRENT_PROVIDER,
        ExtensionType::MangaProvider => MANGA_PROVIDER,
        ExtensionType::OnlineStreamProvider => ONLINESTREAM_PROVIDER,
    }
}

/// Check that `exports` satisfies the contract for `extension_type`.
pub fn check(extension_type: ExtensionType, exports: &ExportTable) -> Result<(), LoadError> {
    for &(name, passed) in required_exports(extension_type) {
        match exports.get(name) {
            None => return Err(LoadError::MissingExport(name.to_owned())),
            Some(arity) if !arity.accepts(passed) => {
                return Err(LoadError::MissingExport(format!(
                    "{name} (host passes {passed} arguments, function declares {arity})"
                )))
            }
            Some(_) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(&str, Arity)]) -> ExportTable {
        entries
            .iter()
            .map(|(name, arity)| (name.to_string(), *arity))
            .collect()
    }

    fn full(extension_type: ExtensionType, wrap: fn(usize) -> Arity) -> ExportTable {
        required_exports(extension_type)
            .iter()
            .map(|&(name, n)| (name.to_owned(), wrap(n)))
            .collect()
    }

    #[test]
    fn test_every_type_accepts_its_own_contract() {
        for ty in ExtensionType::ALL {
            check(ty, &full(ty, Arity::Exact)).unwrap();
            check(ty, &full(ty, Arity::Variadic)).unwrap();
        }
    }

    #[test]
    fn test_missing_export_named() {
        let mut exports = full(ExtensionType::MediaPlayer, Arity::Exact);
        exports.remove("getStatus");
        let err = check(ExtensionType::MediaPlayer, &exports).unwrap_err();
        assert_eq!(err.to_string(), "missing export: getStatus");
    }

    #[test]
    fn test_exact_arity_mismatch() {
        let mut exports = full(ExtensionType::OnlineStreamProvider, Arity::Exact);
        exports.insert("findEpisodeServer".into(), Arity::Exact(1));
        let err = check(ExtensionType::OnlineStreamProvider, &exports).unwrap_err();
        assert!(err.to_string().contains("findEpisodeServer"));
    }

    #[test]
    fn test_variadic_tolerates_fewer_declared() {
        let mut exports = full(ExtensionType::MangaProvider, Arity::Variadic);
        exports.insert("search".into(), Arity::Variadic(0));
        check(ExtensionType::MangaProvider, &exports).unwrap();

        exports.insert("search".into(), Arity::Variadic(2));
        assert!(check(ExtensionType::MangaProvider, &exports).is_err());
    }

    #[test]
    fn test_extra_exports_are_ignored() {
        let mut exports = full(ExtensionType::AnimeTorrentProvider, Arity::Exact);
        exports.extend(table(&[("helper", Arity::Exact(3))]));
        check(ExtensionType::AnimeTorrentProvider, &exports).unwrap();
    }

    #[test]
    fn test_arity_display() {
        assert_eq!(Arity::Exact(2).to_string(), "2");
        assert_eq!(Arity::Variadic(1).to_string(), "1+");
    }
}
