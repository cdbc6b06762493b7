//! Reel extension runtime
//!
//! Runs third-party extensions (media players, torrent, manga and streaming
//! providers) written in Rhai, JavaScript or TypeScript. Each extension gets
//! its own sandbox thread with only a document query binding and a console
//! in scope; the host talks to it through typed adapters looked up in the
//! [`ExtensionBank`].

pub mod adapters;
pub mod backend;
pub mod bank;
pub mod console;
pub mod contract;
pub mod document;
pub mod error;
pub mod loader;
pub mod manifest;
pub mod sandbox;

pub use adapters::{
    AnimeTorrentProvider, Extension, MangaProvider, MediaPlayer, OnlineStreamProvider,
};
pub use backend::{Backend, Backends, Engine, EngineContext};
pub use bank::{BankEntry, ExtensionBank};
pub use contract::{Arity, ExportTable};
pub use document::{Document, Selection};
pub use error::{CapabilityError, ExtensionError, InvocationError, LoadError};
pub use loader::{ExtensionLoader, LoadReport};
pub use manifest::{ExtensionDescriptor, ExtensionInfo, ExtensionType, Language};
pub use sandbox::{Sandbox, SandboxConfig, SandboxTracker};
