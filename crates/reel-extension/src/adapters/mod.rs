//! Typed extension adapters.
//!
//! An adapter owns a handle to a sandbox whose exports already passed the
//! contract check for its type. Each domain method serialises host values,
//! invokes the matching export and deserialises the result into a host
//! type; any fault comes back as an [`InvocationError`] value.
//!
//! [`InvocationError`]: crate::error::InvocationError

use std::sync::Arc;

use crate::contract;
use crate::error::LoadError;
use crate::manifest::ExtensionType;
use crate::sandbox::Sandbox;

pub mod manga;
pub mod media_player;
pub mod onlinestream;
pub mod torrent;

pub use manga::MangaProvider;
pub use media_player::MediaPlayer;
pub use onlinestream::OnlineStreamProvider;
pub use torrent::AnimeTorrentProvider;

/// A live extension, typed by the contract it implements.
#[derive(Debug, Clone)]
pub enum Extension {
    MediaPlayer(MediaPlayer),
    AnimeTorrentProvider(AnimeTorrentProvider),
    MangaProvider(MangaProvider),
    OnlineStreamProvider(OnlineStreamProvider),
}

impl Extension {
    /// Check the sandbox's exports against the contract and wrap it.
    pub fn wrap(extension_type: ExtensionType, sandbox: Arc<Sandbox>) -> Result<Self, LoadError> {
        contract::check(extension_type, sandbox.exports())?;
        Ok(match extension_type {
            ExtensionType::MediaPlayer => Extension::MediaPlayer(MediaPlayer::new(sandbox)),
            ExtensionType::AnimeTorrentProvider => {
                Extension::AnimeTorrentProvider(AnimeTorrentProvider::new(sandbox))
            }
            ExtensionType::MangaProvider => Extension::MangaProvider(MangaProvider::new(sandbox)),
            ExtensionType::OnlineStreamProvider => {
                Extension::OnlineStreamProvider(OnlineStreamProvider::new(sandbox))
            }
        })
    }

    pub fn extension_type(&self) -> ExtensionType {
        match self {
            Extension::MediaPlayer(_) => ExtensionType::MediaPlayer,
            Extension::AnimeTorrentProvider(_) => ExtensionType::AnimeTorrentProvider,
            Extension::MangaProvider(_) => ExtensionType::MangaProvider,
            Extension::OnlineStreamProvider(_) => ExtensionType::OnlineStreamProvider,
        }
    }

    pub fn sandbox(&self) -> &Arc<Sandbox> {
        match self {
            Extension::MediaPlayer(e) => e.sandbox(),
            Extension::AnimeTorrentProvider(e) => e.sandbox(),
            Extension::MangaProvider(e) => e.sandbox(),
            Extension::OnlineStreamProvider(e) => e.sandbox(),
        }
    }
}
