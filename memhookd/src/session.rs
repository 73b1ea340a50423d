//! Hook Session (component D). Composes the Target Inspector and the
//! Remote-Controller into an attach/detach lifecycle.
//!
//! Grounded on the original prototype's `hook_manager.py`
//! (`HookManager`/`HookDescriptor`/`FunctionHook`), with the state machine
//! spec §4.D describes made explicit as an enum instead of the Python
//! version's implicit `func_addr == -1` sentinel.

use crate::controller::RemoteController;
use crate::errors::HookError;
use crate::inspector::TargetInspector;
use crate::metrics::Metrics;
use log::{info, warn};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookState {
    Registered,
    Patched,
    Restored,
    Failed,
    Leaked,
}

pub struct Hook {
    pub function_name: String,
    pub replacement_name: String,
    pub plt_slot: u64,
    pub original_address: Option<u64>,
    pub state: HookState,
}

/// Registration resolves the PLT slot eagerly, so a missing symbol is
/// visible before any mutation happens (spec §4.D).
pub fn register(
    inspector: &TargetInspector,
    pid: i32,
    function_name: &str,
    replacement_name: &str,
) -> Result<Hook, HookError> {
    let plt_slot = inspector.plt_slot_address(pid, function_name).map_err(|e| match e {
        HookError::TargetIntrospection { reason, .. } => HookError::SymbolNotFound {
            pid,
            symbol: format!("{function_name} ({reason})"),
        },
        other => other,
    })?;
    Ok(Hook {
        function_name: function_name.to_string(),
        replacement_name: replacement_name.to_string(),
        plt_slot,
        original_address: None,
        state: HookState::Registered,
    })
}

pub struct HookSession {
    pid: i32,
    controller: RemoteController,
    hooks: Vec<Hook>,
    metrics: Arc<Metrics>,
}

impl HookSession {
    pub fn new(pid: i32, controller: RemoteController, hooks: Vec<Hook>, metrics: Arc<Metrics>) -> Self {
        Self {
            pid,
            controller,
            hooks,
            metrics,
        }
    }

    /// Loads the hook library, then for each registered hook resolves both
    /// symbols and overwrites its PLT slot. At least one successful patch
    /// is required for the caller to proceed into the read loop.
    pub fn inject(&mut self, library_path: &str) -> Result<usize, HookError> {
        self.controller.load_library(library_path)?;

        let mut patched = 0usize;
        for hook in &mut self.hooks {
            let result = (|| -> Result<u64, HookError> {
                let original = self.controller.resolve(&hook.function_name)?;
                let replacement = self.controller.resolve(&hook.replacement_name)?;
                self.controller.poke_word(hook.plt_slot, replacement)?;
                Ok(original)
            })();

            match result {
                Ok(original) => {
                    hook.original_address = Some(original);
                    hook.state = HookState::Patched;
                    patched += 1;
                    self.metrics.inc_hooks_patched();
                    info!("patched {} at {:#x}", hook.function_name, hook.plt_slot);
                }
                Err(err) => {
                    hook.state = HookState::Failed;
                    self.metrics.inc_hooks_failed();
                    warn!("{} not patched: {err}", hook.function_name);
                }
            }
        }

        if patched == 0 {
            return Err(HookError::AttachFailure {
                pid: self.pid,
                reason: "no hook patched successfully".to_string(),
            });
        }
        Ok(patched)
    }

    /// Restores every PATCHED hook's PLT slot, best-effort: one failure
    /// does not abort restoration of the rest.
    pub fn close(&mut self) {
        for hook in &mut self.hooks {
            if hook.state != HookState::Patched {
                continue;
            }
            let Some(original) = hook.original_address else {
                continue;
            };
            match self.controller.poke_word(hook.plt_slot, original) {
                Ok(()) => {
                    hook.state = HookState::Restored;
                    self.metrics.inc_hooks_restored();
                }
                Err(err) => {
                    hook.state = HookState::Leaked;
                    self.metrics.inc_hooks_leaked();
                    warn!(
                        "failed to restore {} at {:#x}: {err} (leaked)",
                        hook.function_name, hook.plt_slot
                    );
                }
            }
        }
    }

    pub fn hooks(&self) -> &[Hook] {
        &self.hooks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_hook(state: HookState, original: Option<u64>) -> Hook {
        Hook {
            function_name: "malloc".to_string(),
            replacement_name: "hook_malloc".to_string(),
            plt_slot: 0x1000,
            original_address: original,
            state,
        }
    }

    #[test]
    fn close_skips_hooks_that_never_patched() {
        let metrics = Arc::new(Metrics::new());
        let controller = RemoteController::new("/nonexistent/gdb-binary", 1);
        let mut session =
            HookSession::new(1, controller, vec![dummy_hook(HookState::Failed, None)], metrics);
        session.close();
        assert_eq!(session.hooks()[0].state, HookState::Failed);
    }

    #[test]
    fn close_marks_unreachable_controller_as_leaked() {
        let metrics = Arc::new(Metrics::new());
        let controller = RemoteController::new("/nonexistent/gdb-binary", 1);
        let mut session = HookSession::new(
            1,
            controller,
            vec![dummy_hook(HookState::Patched, Some(0x2000))],
            metrics.clone(),
        );
        session.close();
        assert_eq!(session.hooks()[0].state, HookState::Leaked);
        assert_eq!(metrics.hooks_leaked(), 1);
    }
}
