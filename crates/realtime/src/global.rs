//! Process-wide manager.
//!
//! Applications that want a single manager shared by every component can
//! install one at startup and fetch it anywhere afterwards.

use crate::RealtimeManager;
use std::sync::OnceLock;

static MANAGER: OnceLock<RealtimeManager> = OnceLock::new();

/// Install the process-wide manager. Returns the manager back if one is
/// already installed.
pub fn install(manager: RealtimeManager) -> Result<(), RealtimeManager> {
    MANAGER.set(manager)
}

/// The process-wide manager, if installed.
pub fn get() -> Option<RealtimeManager> {
    MANAGER.get().cloned()
}
