//! Target Inspector (component B). A pure read: given a PID and a function
//! name, recovers the absolute address of that function's PLT slot.
//!
//! Grounded on the original prototype's `hook_injector.py`
//! (`get_process_path` / `get_obj_dump` / `get_plt_offset` /
//! `get_prog_address`), reimplemented against the teacher's `procfs`
//! dependency (`cognitod/Cargo.toml`) for `/proc` access, plus `objdump -d`
//! for the PLT annotation scan.

use crate::errors::HookError;
use procfs::process::Process;
use regex::Regex;
use std::path::PathBuf;
use std::process::Command;

pub struct TargetInspector {
    objdump_path: String,
}

impl TargetInspector {
    pub fn new(objdump_path: impl Into<String>) -> Self {
        Self {
            objdump_path: objdump_path.into(),
        }
    }

    fn process(&self, pid: i32) -> Result<Process, HookError> {
        Process::new(pid).map_err(|e| HookError::TargetIntrospection {
            pid,
            reason: format!("opening /proc/{pid} failed: {e}"),
        })
    }

    /// Resolve `/proc/<pid>/exe` to an absolute binary path.
    pub fn process_path(&self, pid: i32) -> Result<PathBuf, HookError> {
        self.process(pid)?.exe().map_err(|e| HookError::TargetIntrospection {
            pid,
            reason: format!("reading /proc/{pid}/exe failed: {e}"),
        })
    }

    /// The load base: the start address of the first mapping in
    /// `/proc/<pid>/maps`.
    pub fn load_base(&self, pid: i32) -> Result<u64, HookError> {
        let maps = self.process(pid)?.maps().map_err(|e| HookError::TargetIntrospection {
            pid,
            reason: format!("reading /proc/{pid}/maps failed: {e}"),
        })?;
        let first = maps.iter().next().ok_or_else(|| HookError::TargetIntrospection {
            pid,
            reason: "/proc/<pid>/maps was empty".to_string(),
        })?;
        Ok(first.address.0)
    }

    fn disassembly(&self, binary: &std::path::Path) -> Result<String, HookError> {
        let output = Command::new(&self.objdump_path)
            .arg("-d")
            .arg(binary)
            .output()
            .map_err(|e| HookError::TargetIntrospection {
                pid: 0,
                reason: format!("spawning {} failed: {e}", self.objdump_path),
            })?;
        if !output.status.success() {
            return Err(HookError::TargetIntrospection {
                pid: 0,
                reason: format!("{} exited with {}", self.objdump_path, output.status),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// The PLT-table offset of `function`'s entry, by scanning the
    /// disassembly for a `# <offset> <function@plt>` annotation.
    pub fn plt_offset(&self, binary: &std::path::Path, function: &str) -> Result<u64, HookError> {
        let text = self.disassembly(binary)?;
        plt_offset_from_disassembly(&text, function).ok_or_else(|| HookError::TargetIntrospection {
            pid: 0,
            reason: format!("{function} not found in PLT of {}", binary.display()),
        })
    }

    /// Absolute address of `function`'s PLT slot in the running target.
    pub fn plt_slot_address(&self, pid: i32, function: &str) -> Result<u64, HookError> {
        let binary = self.process_path(pid)?;
        let base = self.load_base(pid)?;
        let offset = self.plt_offset(&binary, function).map_err(|e| match e {
            HookError::TargetIntrospection { reason, .. } => {
                HookError::TargetIntrospection { pid, reason }
            }
            other => other,
        })?;
        Ok(base + offset)
    }
}

fn plt_offset_from_disassembly(text: &str, function: &str) -> Option<u64> {
    let pattern = format!(r"#\s([0-9a-fA-F]+)\s<{}(@plt)?>", regex::escape(function));
    let re = Regex::new(&pattern).ok()?;
    let caps = re.captures(text)?;
    u64::from_str_radix(&caps[1], 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_plt_offset_annotation() {
        let text = "  401030:\t48 8b 05\tmov 0x2fc9(%rip),%rax # 403ff8 <malloc@plt>\n";
        assert_eq!(plt_offset_from_disassembly(text, "malloc"), Some(0x403ff8));
    }

    #[test]
    fn missing_symbol_returns_none() {
        let text = "  401030:\tcall # 403ff0 <free@plt>\n";
        assert_eq!(plt_offset_from_disassembly(text, "malloc"), None);
    }

    #[test]
    fn mangled_symbol_matches_literally() {
        let text = "# 404000 <_Znwm@plt>\n";
        assert_eq!(plt_offset_from_disassembly(text, "_Znwm"), Some(0x404000));
    }

    #[test]
    fn process_path_reads_proc_self_exe() {
        let inspector = TargetInspector::new("objdump");
        let path = inspector.process_path(std::process::id() as i32).unwrap();
        assert!(path.is_absolute());
    }

    #[test]
    fn load_base_parses_proc_self_maps() {
        let inspector = TargetInspector::new("objdump");
        let base = inspector.load_base(std::process::id() as i32).unwrap();
        assert!(base > 0 || base == 0);
    }
}
