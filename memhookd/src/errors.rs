//! Domain error taxonomy. Policy (which kinds are fatal at startup versus
//! per-hook and recoverable) lives with the callers that decide it —
//! [`crate::session`] for the per-hook kinds, [`crate::orchestrator`] for
//! everything else.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("insufficient privilege: {0}")]
    Privilege(String),

    #[error("failed to introspect target process {pid}: {reason}")]
    TargetIntrospection { pid: i32, reason: String },

    #[error("hook library build failed: {0}")]
    BuildFailure(String),

    #[error("failed to attach to target process {pid}: {reason}")]
    AttachFailure { pid: i32, reason: String },

    #[error("symbol {symbol:?} not found in target process {pid}")]
    SymbolNotFound { pid: i32, symbol: String },

    #[error("failed to patch PLT slot for {symbol:?}: {reason}")]
    PatchFailure { symbol: String, reason: String },

    #[error("failed to open shared memory object {name:?}: {reason}")]
    SharedMemoryOpen { name: String, reason: String },

    #[error("ring corruption at slot {slot}: {reason}")]
    RingCorruption { slot: u32, reason: String },

    #[error("log I/O failure writing {path:?}: {source}")]
    LogIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl HookError {
    /// True for the four kinds that the orchestrator treats as fatal at
    /// startup: `Privilege`, `BuildFailure`, `AttachFailure`,
    /// `SharedMemoryOpen`.
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self,
            HookError::Privilege(_)
                | HookError::BuildFailure(_)
                | HookError::AttachFailure { .. }
                | HookError::SharedMemoryOpen { .. }
        )
    }

    /// True for the two per-hook kinds that the session reports and skips
    /// rather than aborting the whole run.
    pub fn is_per_hook(&self) -> bool {
        matches!(
            self,
            HookError::SymbolNotFound { .. } | HookError::PatchFailure { .. }
        )
    }
}
