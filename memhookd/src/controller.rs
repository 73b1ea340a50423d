//! Remote-Controller (component C). Three operations against a live
//! target, each a single batch-mode invocation of an external debugger.
//!
//! Grounded on the original prototype's `gdb_utils.py`: empty stdout means
//! "could not attach"; everything else is parsed with a regex for a
//! hexadecimal address.

use crate::errors::HookError;
use regex::Regex;
use std::process::Command;

pub struct RemoteController {
    gdb_path: String,
    pid: i32,
}

impl RemoteController {
    pub fn new(gdb_path: impl Into<String>, pid: i32) -> Self {
        Self {
            gdb_path: gdb_path.into(),
            pid,
        }
    }

    fn run(&self, gdb_command: &str) -> Result<String, HookError> {
        let output = Command::new(&self.gdb_path)
            .args(["-p", &self.pid.to_string(), "-ex", gdb_command, "-batch"])
            .output()
            .map_err(|e| HookError::AttachFailure {
                pid: self.pid,
                reason: format!("spawning {} failed: {e}", self.gdb_path),
            })?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if stdout.trim().is_empty() {
            return Err(HookError::AttachFailure {
                pid: self.pid,
                reason: format!("gdb produced no output for `{gdb_command}`"),
            });
        }
        Ok(stdout)
    }

    /// `resolve(symbol) -> address`.
    pub fn resolve(&self, symbol: &str) -> Result<u64, HookError> {
        let stdout = self.run(&format!("print (void*) {symbol}"))?;
        parse_address(&stdout).ok_or_else(|| HookError::SymbolNotFound {
            pid: self.pid,
            symbol: symbol.to_string(),
        })
    }

    /// `load_library(path) -> handle`.
    pub fn load_library(&self, path: &str) -> Result<u64, HookError> {
        let stdout = self.run(&format!("call (void*) dlopen(\"{path}\", 1)"))?;
        parse_address(&stdout).ok_or_else(|| HookError::AttachFailure {
            pid: self.pid,
            reason: format!("dlopen({path}) did not return a handle: {stdout:?}"),
        })
    }

    /// `poke_word(address, value)`.
    pub fn poke_word(&self, address: u64, value: u64) -> Result<(), HookError> {
        self.run(&format!("set *(void **) {address:#x} = {value:#x}"))
            .map(|_| ())
            .map_err(|e| match e {
                HookError::AttachFailure { reason, .. } => HookError::PatchFailure {
                    symbol: format!("{address:#x}"),
                    reason,
                },
                other => other,
            })
    }
}

fn parse_address(text: &str) -> Option<u64> {
    let re = Regex::new(r"0x([a-fA-F0-9]+)").ok()?;
    let caps = re.captures(text)?;
    u64::from_str_radix(&caps[1], 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_hex_address() {
        assert_eq!(parse_address("$1 = (void *) 0x7ffff7a1c7b0\n"), Some(0x7ffff7a1c7b0));
    }

    #[test]
    fn parses_function_annotation() {
        assert_eq!(parse_address("$1 = 0x401136 <malloc>\n"), Some(0x401136));
    }

    #[test]
    fn empty_output_has_no_address() {
        assert_eq!(parse_address(""), None);
        assert_eq!(parse_address("No symbol table is loaded.\n"), None);
    }

    #[test]
    fn controller_reports_attach_failure_for_nonexistent_gdb() {
        let controller = RemoteController::new("/nonexistent/gdb-binary", 1);
        let err = controller.resolve("malloc").unwrap_err();
        assert!(matches!(err, HookError::AttachFailure { .. }));
    }
}
