//! Shared application state.

use std::sync::Arc;

use reel_extension::{ExtensionBank, ExtensionLoader};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::ServerConfig;

pub struct AppState {
    pub bank: Arc<ExtensionBank>,
    pub loader: ExtensionLoader,
    pub config: ServerConfig,
    pub reload_guard: OperationGuard,
}

impl AppState {
    pub fn new(config: ServerConfig, loader: ExtensionLoader) -> Self {
        Self {
            bank: loader.bank().clone(),
            loader,
            config,
            reload_guard: OperationGuard::default(),
        }
    }
}

/// Single-owner right to run a long operation. Whoever holds the permit
/// owns the operation; everyone else is told it is busy.
#[derive(Debug, Clone, Default)]
pub struct OperationGuard {
    lock: Arc<Mutex<()>>,
}

pub type OperationPermit = OwnedMutexGuard<()>;

impl OperationGuard {
    /// Take the permit, or `None` if the operation is already running.
    pub fn try_start(&self) -> Option<OperationPermit> {
        self.lock.clone().try_lock_owned().ok()
    }

    pub fn is_running(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}
