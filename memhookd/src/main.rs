//! Live memory-allocation profiler daemon entry point.
//!
//! Grounded on the teacher's `main.rs`: `env_logger::init()` before
//! anything else, an environment check, then hand off into the async
//! runtime. Exit codes follow spec §6 — zero on a clean detach, nonzero on
//! any startup failure.

mod aggregator;
mod config;
mod controller;
mod errors;
mod inspector;
mod metrics;
mod orchestrator;
mod report;
mod ring;
mod session;
mod template;
mod timeline;

use clap::Parser;
use config::{Args, DaemonConfig};
use metrics::Metrics;
use std::path::PathBuf;
use std::sync::Arc;

/// The hook-library template shipped alongside the daemon binary. Not a
/// workspace member (it contains unsubstituted placeholder tokens that
/// wouldn't compile on their own) — see the root `Cargo.toml`'s
/// `workspace.exclude`.
fn template_dir() -> PathBuf {
    std::env::var("MEMHOOKD_TEMPLATE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("..").join("hook-template"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let daemon_config = DaemonConfig::load(args.config.as_ref());
    let resolved = args.resolve();
    let metrics = Arc::new(Metrics::new());

    if let Err(e) = orchestrator::run(resolved, daemon_config, &template_dir(), metrics).await {
        log::error!("{e}");
        std::process::exit(exit_code_for(&e));
    }

    std::process::exit(0);
}

fn exit_code_for(err: &errors::HookError) -> i32 {
    if err.is_fatal_at_startup() {
        2
    } else {
        1
    }
}
