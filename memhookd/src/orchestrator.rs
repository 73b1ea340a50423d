//! Orchestrator (component H). Wires components A-G into the daemon's
//! startup → read-loop → shutdown sequence.
//!
//! Grounded on the teacher's `main.rs` for the overall shape: an
//! environment check before anything else, a periodic `tokio::spawn`
//! background task, and a `tokio::signal` shutdown race with a bounded
//! grace period for cleanup.

use crate::aggregator::Aggregator;
use crate::config::{DaemonConfig, ResolvedArgs, TimestampMethod};
use crate::controller::RemoteController;
use crate::errors::HookError;
use crate::inspector::TargetInspector;
use crate::metrics::Metrics;
use crate::report::{render_text_report, EventLog};
use crate::ring::RingConsumer;
use crate::session::{self, Hook, HookSession};
use crate::template::{self, Placeholders};
use crate::timeline::{RollingTimeline, TimelineSink};
use caps::{CapSet, Capability};
use log::{info, warn};
use nix::unistd::Uid;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::time::interval;

/// Attaching via a debugger requires either root or `CAP_SYS_PTRACE`.
pub fn check_privilege() -> Result<(), HookError> {
    if Uid::effective().is_root() {
        return Ok(());
    }
    match caps::has_cap(None, CapSet::Effective, Capability::CAP_SYS_PTRACE) {
        Ok(true) => Ok(()),
        Ok(false) => Err(HookError::Privilege(
            "need root or CAP_SYS_PTRACE to attach to another process".to_string(),
        )),
        Err(e) => Err(HookError::Privilege(format!("could not query capabilities: {e}"))),
    }
}

/// Runs the daemon to completion: build the hook library, inject it,
/// drain the ring until interrupted, then detach and flush. Returns once
/// the target has been fully detached (or every hook leaked).
pub async fn run(
    args: ResolvedArgs,
    daemon_config: DaemonConfig,
    template_dir: &Path,
    metrics: Arc<Metrics>,
) -> Result<(), HookError> {
    check_privilege()?;

    let shm_name = format!("{}{}", daemon_config.shm_name_prefix, args.pid);
    let placeholders = Placeholders::from_args(&args, &shm_name);
    let scratch_dir = tempfile::tempdir()
        .map_err(|e| HookError::BuildFailure(format!("could not create scratch dir: {e}")))?;
    info!("rendering and building hook library for pid {}", args.pid);
    let artifact = template::render_and_build(
        template_dir,
        scratch_dir.path(),
        &placeholders,
        &daemon_config.cargo_path,
    )?;

    let inspector = TargetInspector::new(daemon_config.objdump_path.clone());
    let mut hooks: Vec<Hook> = Vec::new();
    for function_name in &args.hook_function {
        match session::register(&inspector, args.pid, function_name, replacement_for(function_name)) {
            Ok(hook) => hooks.push(hook),
            Err(e) => warn!("skipping {function_name}: {e}"),
        }
    }
    if hooks.is_empty() {
        return Err(HookError::AttachFailure {
            pid: args.pid,
            reason: "no hook function could be resolved to a PLT slot".to_string(),
        });
    }

    let controller = RemoteController::new(daemon_config.gdb_path.clone(), args.pid);
    let mut session = HookSession::new(args.pid, controller, hooks, metrics.clone());
    session.inject(&artifact.to_string_lossy())?;

    // Every PLT slot in the target is patched from this point on, so any
    // later failure — the ring never materializing, the log file being
    // unwritable, whatever — must still restore-or-leak it rather than
    // bubble straight out. `session.close()` runs on every path out of
    // `drive_session`, success or failure, matching spec.md's guarantee
    // that a session always ends in restore-or-leak bookkeeping, never a
    // silent skip.
    let result = drive_session(&args, &shm_name, metrics.clone()).await;
    session.close();
    result
}

/// Everything that happens once the target is patched: open the ring,
/// build the aggregator/timeline/log, run the read loop until shutdown,
/// and flush the final summary.
async fn drive_session(args: &ResolvedArgs, shm_name: &str, metrics: Arc<Metrics>) -> Result<(), HookError> {
    let ring = open_ring_with_retry(shm_name, args.ring_capacity, Duration::from_secs(5)).await?;

    let aggregator = Arc::new(Aggregator::new());
    let timeline = args
        .graph
        .then(|| Arc::new(AsyncMutex::new(RollingTimeline::new(Duration::from_secs(args.time_window_secs)))));

    let log = match &args.output_file {
        Some(path) => Some(EventLog::create(path).await?),
        None => None,
    };

    // A log file and the scheduled text report are mutually exclusive: a
    // log consumes every event for replay, a report only summarizes.
    let report_loop = (args.output_file.is_none())
        .then(|| report_loop(aggregator.clone(), args.print_frequency_secs));

    let shutdown = Arc::new(Notify::new());
    let shutdown_waiter = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.notify_one();
        }
    });

    let exit = read_loop(
        ring,
        aggregator.clone(),
        timeline,
        log,
        metrics,
        args.read_frequency_secs,
        args.timestamp_method,
        shutdown,
    )
    .await?;

    shutdown_waiter.abort();
    if let Some(report_loop) = report_loop {
        report_loop.abort_if_running();
    }

    // The read loop hands its `EventLog` back on every exit path,
    // including a clean shutdown, specifically so the final summary can
    // always be appended here rather than being lost with a cancelled
    // future's owned state.
    if let Some(mut log) = exit.log {
        log.append_summary(&aggregator.snapshot()).await?;
    }
    Ok(())
}

fn replacement_for(function_name: &str) -> &'static str {
    match function_name {
        "malloc" => "hook_malloc",
        "free" => "hook_free",
        "_Znwm" => "hook_znwm",
        "_Znam" => "hook_znam",
        "_ZnwmRKSt9nothrow_t" => "hook_znwm_nothrow",
        "_ZdlPv" => "hook_zdlpv",
        "_ZdlPvm" => "hook_zdlpvm",
        "_ZdaPv" => "hook_zdapv",
        "_ZdaPvm" => "hook_zdapvm",
        "_ZdlPvRKSt9nothrow_t" => "hook_zdlpv_nothrow",
        _ => "hook_malloc",
    }
}

async fn open_ring_with_retry(name: &str, capacity: u32, timeout: Duration) -> Result<RingConsumer, HookError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match RingConsumer::open(name, capacity) {
            Ok(ring) => return Ok(ring),
            Err(e) if tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(50)).await;
                let _ = &e;
            }
            Err(e) => return Err(e),
        }
    }
}

/// What the read loop hands back once it stops, so the caller can still
/// flush a final summary into the log regardless of how the loop ended.
struct ReadLoopExit {
    log: Option<EventLog>,
}

#[allow(clippy::too_many_arguments)]
async fn read_loop(
    ring: RingConsumer,
    aggregator: Arc<Aggregator>,
    timeline: Option<Arc<AsyncMutex<RollingTimeline>>>,
    mut log: Option<EventLog>,
    metrics: Arc<Metrics>,
    read_frequency_secs: u64,
    timestamp_method: TimestampMethod,
    shutdown: Arc<Notify>,
) -> Result<ReadLoopExit, HookError> {
    let started = Instant::now();
    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                info!("shutdown requested, detaching");
                return Ok(ReadLoopExit { log });
            }
            _ = wait_for_next_poll(read_frequency_secs) => {}
        }

        let mut drained_events = Vec::new();
        let drained = ring.drain(
            |event| drained_events.push(event),
            |slot| {
                warn!("dropping corrupt ring slot {slot}");
                metrics.inc_ring_corruption();
                aggregator.note_ring_corruption();
            },
        );
        metrics.inc_poll_cycle();
        metrics.set_ring_overflows(ring.overflow_count() as u64);
        aggregator.note_ring_overflow(ring.overflow_count() as u64);
        if drained > 0 {
            metrics.inc_events_consumed(drained as u64);
        }

        for mut event in drained_events {
            // spec.md §9(ii): when the producer writes no timestamp
            // (`timestamp_method == none`), the consumer stamps one on
            // arrival instead of passing the literal zero through.
            if timestamp_method == TimestampMethod::None {
                event.timestamp = started.elapsed().as_nanos() as u64;
            }
            aggregator.consume(&event);
            if let Some(log) = log.as_mut() {
                log.append(&event).await?;
            }
            if let Some(timeline) = &timeline {
                let mut timeline = timeline.lock().await;
                let at = Duration::from_nanos(event.timestamp);
                timeline.add_event(at, aggregator.live_bytes(), event.decoded_kind().unwrap_or(memhook_common::Kind::Free));
            }
        }
        if let Some(timeline) = &timeline {
            timeline.lock().await.update();
        }
    }
}

async fn wait_for_next_poll(read_frequency_secs: u64) {
    if read_frequency_secs > 0 {
        tokio::time::sleep(Duration::from_secs(read_frequency_secs)).await;
    } else {
        tokio::task::yield_now().await;
    }
}

struct ReportLoopHandle(tokio::task::JoinHandle<()>);

impl ReportLoopHandle {
    fn abort_if_running(&self) {
        self.0.abort();
    }
}

fn report_loop(aggregator: Arc<Aggregator>, print_frequency_secs: u64) -> ReportLoopHandle {
    let handle = tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(print_frequency_secs.max(1)));
        loop {
            ticker.tick().await;
            let snapshot = aggregator.snapshot();
            println!("{}", render_text_report(&snapshot));
        }
    });
    ReportLoopHandle(handle)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("installing SIGTERM handler");
        sigterm.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replacement_for_known_symbols_is_stable() {
        assert_eq!(replacement_for("malloc"), "hook_malloc");
        assert_eq!(replacement_for("_ZdlPvm"), "hook_zdlpvm");
    }

    #[test]
    fn replacement_for_unknown_symbol_falls_back_to_malloc_hook() {
        assert_eq!(replacement_for("not_a_real_symbol"), "hook_malloc");
    }
}
