//! The CLI boundary the Orchestrator consumes, plus a small ambient TOML
//! layer for paths to external tools. The CLI option set mirrors the
//! original prototype's `cli.py` field-for-field; the TOML layer follows
//! the teacher's `Config::load()` shape (env-overridable path, all-defaulted
//! fields).

use clap::{Parser, ValueEnum};
use log::warn;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

const DEFAULT_CONFIG_PATH: &str = "/etc/memhookd/memhookd.toml";
const ENV_CONFIG_PATH: &str = "MEMHOOKD_CONFIG";

/// Minimum ring capacity, in records, regardless of how a too-small value
/// was requested.
pub const MIN_RING_CAPACITY: u32 = 16;

fn default_hook_functions() -> Vec<String> {
    [
        "malloc",
        "free",
        "_Znwm",
        "_Znam",
        "_ZnwmRKSt9nothrow_t",
        "_ZdlPv",
        "_ZdlPvm",
        "_ZdaPv",
        "_ZdaPvm",
        "_ZdlPvRKSt9nothrow_t",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum BacktraceMethod {
    /// Cheap frame-pointer walk.
    Fast,
    /// Platform unwinder.
    Platform,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum TimestampMethod {
    /// Cycle counter (e.g. rdtscp) read in the hook.
    Cycle,
    /// Monotonic clock read in the hook.
    Monotonic,
    /// Producer writes zero; the consumer stamps on arrival.
    None,
}

// The original prototype's `cli.py` spells several of these as single-dash
// multi-letter flags (`-hf`, `-fsr`, `-fs`, `-sb`, `-se`, `-pf`, `-rf`,
// `-tm`) — argparse allows an arbitrary dash-prefixed string as a short
// option. clap's `short` is restricted to one `char`, so there is no direct
// equivalent; each is instead given a `visible_alias`, which clap renders as
// a second `--long`-style spelling rather than a single dash. `--pid`,
// `--output-file`, `--graph`, and `--time-window` keep true single-char
// short flags since those originals are one letter already.
#[derive(Parser, Debug)]
#[command(name = "memhookd")]
#[command(about = "Live memory-allocation profiler")]
pub struct Args {
    /// Target process ID to attach to.
    #[arg(short = 'p', long)]
    pub pid: i32,

    /// Functions to hook (raw or mangled symbol names).
    #[arg(long = "hook-function", visible_alias = "hf", num_args = 1.., default_values_t = default_hook_functions())]
    pub hook_function: Vec<String>,

    /// Inclusive size ranges to trace, each as "min-max".
    #[arg(long = "filter-size-range", visible_alias = "fsr", num_args = 1..)]
    pub filter_size_range: Vec<String>,

    /// Exact sizes to trace.
    #[arg(long = "filter-size", visible_alias = "fs", num_args = 1..)]
    pub filter_size: Vec<i64>,

    /// Ring capacity in bytes. Takes precedence over `--shm-buffer-entries`
    /// when both are given.
    #[arg(long = "shm-buffer-bytes", visible_alias = "sb")]
    pub shm_buffer_bytes: Option<usize>,

    /// Ring capacity in records.
    #[arg(long = "shm-buffer-entries", visible_alias = "se")]
    pub shm_buffer_entries: Option<usize>,

    /// Seconds between scheduled text reports.
    #[arg(long = "print-frequency", visible_alias = "pf", default_value_t = 5)]
    pub print_frequency: i64,

    /// Seconds between ring polls; 0 polls as fast as possible.
    #[arg(long = "read-frequency", visible_alias = "rf", default_value_t = 0)]
    pub read_frequency: i64,

    /// Append-only log file. If set, scheduled text reports are suppressed.
    #[arg(short = 'o', long = "output-file")]
    pub output_file: Option<PathBuf>,

    /// Enable the timeline view.
    #[arg(short = 'g', long)]
    pub graph: bool,

    /// Timeline rolling window, in seconds.
    #[arg(short = 'w', long = "time-window", default_value_t = 32)]
    pub time_window: u64,

    #[arg(long = "backtrace-method", value_enum, default_value_t = BacktraceMethod::Fast)]
    pub backtrace_method: BacktraceMethod,

    #[arg(long = "timestamp-method", visible_alias = "tm", value_enum, default_value_t = TimestampMethod::Monotonic)]
    pub timestamp_method: TimestampMethod,

    /// Path to an optional TOML configuration file.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// A validated, normalized view over [`Args`] — the negative-value
/// clamping and bytes-vs-entries precedence the raw CLI leaves ambiguous.
#[derive(Debug, Clone)]
pub struct ResolvedArgs {
    pub pid: i32,
    pub hook_function: Vec<String>,
    pub filter_size_range: Vec<(u64, u64)>,
    pub filter_size: Vec<u64>,
    pub ring_capacity: u32,
    pub print_frequency_secs: u64,
    pub read_frequency_secs: u64,
    pub output_file: Option<PathBuf>,
    pub graph: bool,
    pub time_window_secs: u64,
    pub backtrace_method: BacktraceMethod,
    pub timestamp_method: TimestampMethod,
}

impl Args {
    pub fn resolve(self) -> ResolvedArgs {
        let filter_size = self
            .filter_size
            .into_iter()
            .filter_map(|value| {
                if value < 0 {
                    warn!("ignoring negative --filter-size value {value}");
                    None
                } else {
                    Some(value as u64)
                }
            })
            .collect();

        let filter_size_range = self
            .filter_size_range
            .into_iter()
            .filter_map(|raw| match parse_size_range(&raw) {
                Ok(range) => Some(range),
                Err(reason) => {
                    warn!("ignoring malformed --filter-size-range {raw:?}: {reason}");
                    None
                }
            })
            .collect();

        let print_frequency_secs = if self.print_frequency < 0 {
            warn!("--print-frequency was negative, clamping to 5");
            5
        } else {
            self.print_frequency as u64
        };

        let read_frequency_secs = if self.read_frequency < 0 {
            warn!("--read-frequency was negative, clamping to 0");
            0
        } else {
            self.read_frequency as u64
        };

        let ring_capacity = resolve_ring_capacity(self.shm_buffer_bytes, self.shm_buffer_entries);

        ResolvedArgs {
            pid: self.pid,
            hook_function: self.hook_function,
            filter_size_range,
            filter_size,
            ring_capacity,
            print_frequency_secs,
            read_frequency_secs,
            output_file: self.output_file,
            graph: self.graph,
            time_window_secs: self.time_window,
            backtrace_method: self.backtrace_method,
            timestamp_method: self.timestamp_method,
        }
    }
}

/// Bytes take precedence over an entry count per spec §6 — "the latter
/// taking precedence" — both floored to `MIN_RING_CAPACITY`.
fn resolve_ring_capacity(bytes: Option<usize>, entries: Option<usize>) -> u32 {
    const DEFAULT_ENTRIES: usize = 100_000;
    let capacity = if let Some(bytes) = bytes {
        memhook_common::capacity_for_bytes(bytes)
    } else {
        entries.unwrap_or(DEFAULT_ENTRIES) as u32
    };
    capacity.max(MIN_RING_CAPACITY)
}

fn parse_size_range(raw: &str) -> Result<(u64, u64), String> {
    let (min, max) = raw
        .split_once('-')
        .ok_or_else(|| "expected MIN-MAX".to_string())?;
    let min: u64 = min.trim().parse().map_err(|_| "invalid minimum".to_string())?;
    let max: u64 = max.trim().parse().map_err(|_| "invalid maximum".to_string())?;
    if min > max {
        return Err("minimum exceeds maximum".to_string());
    }
    Ok((min, max))
}

/// Ambient configuration for external-tool locations; not part of the
/// closed CLI option set, overridable via `MEMHOOKD_CONFIG` or `--config`.
#[derive(Debug, Deserialize, Clone)]
pub struct DaemonConfig {
    #[serde(default = "default_gdb_path")]
    pub gdb_path: String,
    #[serde(default = "default_objdump_path")]
    pub objdump_path: String,
    #[serde(default = "default_cargo_path")]
    pub cargo_path: String,
    #[serde(default = "default_shm_name_prefix")]
    pub shm_name_prefix: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            gdb_path: default_gdb_path(),
            objdump_path: default_objdump_path(),
            cargo_path: default_cargo_path(),
            shm_name_prefix: default_shm_name_prefix(),
        }
    }
}

fn default_gdb_path() -> String {
    "gdb".to_string()
}
fn default_objdump_path() -> String {
    "objdump".to_string()
}
fn default_cargo_path() -> String {
    "cargo".to_string()
}
fn default_shm_name_prefix() -> String {
    "/memhook_".to_string()
}

impl DaemonConfig {
    /// Load from `explicit_path`, else `MEMHOOKD_CONFIG`, else the default
    /// system path. Missing or unparsable files fall back to defaults.
    pub fn load(explicit_path: Option<&PathBuf>) -> Self {
        let path = explicit_path.cloned().unwrap_or_else(|| {
            PathBuf::from(
                std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string()),
            )
        });
        match fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_default(),
            Err(_) => DaemonConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_range_parses_min_max() {
        assert_eq!(parse_size_range("16-64").unwrap(), (16, 64));
        assert!(parse_size_range("64-16").is_err());
        assert!(parse_size_range("not-a-range-at-all-42").is_err());
    }

    #[test]
    fn bytes_take_precedence_over_entries() {
        assert_eq!(resolve_ring_capacity(Some(12 + 192 * 10), Some(5)), 10);
    }

    #[test]
    fn entries_used_when_bytes_absent() {
        assert_eq!(resolve_ring_capacity(None, Some(500)), 500);
    }

    #[test]
    fn default_entries_when_neither_given() {
        assert_eq!(resolve_ring_capacity(None, None), 100_000);
    }

    #[test]
    fn capacity_is_floored_to_the_minimum() {
        assert_eq!(resolve_ring_capacity(None, Some(1)), MIN_RING_CAPACITY);
    }

    #[test]
    fn daemon_config_env_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        writeln!(file, "gdb_path = \"/usr/bin/gdb-multiarch\"").unwrap();
        unsafe {
            std::env::set_var(ENV_CONFIG_PATH, file.path());
        }
        let cfg = DaemonConfig::load(None);
        assert_eq!(cfg.gdb_path, "/usr/bin/gdb-multiarch");
        assert_eq!(cfg.objdump_path, "objdump");
        unsafe {
            std::env::remove_var(ENV_CONFIG_PATH);
        }
    }

    #[test]
    fn args_resolve_clamps_negative_frequencies() {
        let args = Args {
            pid: 1,
            hook_function: vec!["malloc".into()],
            filter_size_range: vec![],
            filter_size: vec![-5, 16],
            shm_buffer_bytes: None,
            shm_buffer_entries: None,
            print_frequency: -1,
            read_frequency: -1,
            output_file: None,
            graph: false,
            time_window: 32,
            backtrace_method: BacktraceMethod::Fast,
            timestamp_method: TimestampMethod::Monotonic,
            config: None,
        };
        let resolved = args.resolve();
        assert_eq!(resolved.print_frequency_secs, 5);
        assert_eq!(resolved.read_frequency_secs, 0);
        assert_eq!(resolved.filter_size, vec![16]);
    }
}
