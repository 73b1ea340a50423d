//! Reporting half of the Aggregator (component F): scheduled ranked-view
//! text reports, and an append-only event log with a final summary.
//!
//! Grounded on the teacher's `handler::JsonlHandler` for the
//! append-and-flush shape; logs and live prints are mutually exclusive per
//! spec §4.H, so this module owns both and the orchestrator picks one.

use crate::aggregator::{AggregatorSnapshot, CallSiteStats};
use crate::errors::HookError;
use memhook_common::Event;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Renders the four ranked views spec §4.F names: current-allocations by
/// call count, current-allocations by bytes, total-allocations (both
/// orderings), total-frees (both orderings).
pub fn render_text_report(snapshot: &AggregatorSnapshot) -> String {
    let mut out = String::new();
    if snapshot.ring_overflow_seen > 0 {
        out.push_str(&format!(
            "warning: ring overflow count = {}\n",
            snapshot.ring_overflow_seen
        ));
    }
    if snapshot.ring_corruptions_seen > 0 {
        out.push_str(&format!(
            "warning: ring corruptions dropped = {}\n",
            snapshot.ring_corruptions_seen
        ));
    }
    out.push_str(&format!(
        "live: {} bytes across {} allocations\n\n",
        snapshot.live_bytes, snapshot.live_count
    ));

    out.push_str("current-allocations by call count:\n");
    out.push_str(&ranked(&snapshot.current_allocations, RankBy::Calls));
    out.push_str("\ncurrent-allocations by bytes:\n");
    out.push_str(&ranked(&snapshot.current_allocations, RankBy::Bytes));
    out.push_str("\ntotal-allocations by call count:\n");
    out.push_str(&ranked(&snapshot.total_allocations, RankBy::Calls));
    out.push_str("\ntotal-allocations by bytes:\n");
    out.push_str(&ranked(&snapshot.total_allocations, RankBy::Bytes));
    out.push_str("\ntotal-frees by call count:\n");
    out.push_str(&ranked(&snapshot.total_frees, RankBy::Calls));
    out.push_str("\ntotal-frees by bytes:\n");
    out.push_str(&ranked(&snapshot.total_frees, RankBy::Bytes));
    out
}

#[derive(Copy, Clone)]
enum RankBy {
    Calls,
    Bytes,
}

fn ranked(table: &std::collections::HashMap<u64, CallSiteStats>, by: RankBy) -> String {
    let mut rows: Vec<(u64, CallSiteStats)> = table.iter().map(|(k, v)| (*k, *v)).collect();
    rows.sort_by(|a, b| match by {
        RankBy::Calls => b.1.calls.cmp(&a.1.calls),
        RankBy::Bytes => b.1.total_bytes.cmp(&a.1.total_bytes),
    });
    rows.iter()
        .map(|(addr, stats)| format!("  {addr:#x}: calls={} bytes={}\n", stats.calls, stats.total_bytes))
        .collect()
}

#[derive(Serialize)]
struct LoggedEvent {
    address: u64,
    timestamp: u64,
    size: u32,
    kind: u32,
    backtrace: Vec<u64>,
}

impl From<&Event> for LoggedEvent {
    fn from(event: &Event) -> Self {
        LoggedEvent {
            address: event.address,
            timestamp: event.timestamp,
            size: event.size,
            kind: event.kind,
            backtrace: event.backtrace().to_vec(),
        }
    }
}

/// Append-only event log: every event in arrival (timestamp) order,
/// followed by a final summary section on shutdown.
pub struct EventLog {
    path: PathBuf,
    file: File,
}

impl EventLog {
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self, HookError> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| HookError::LogIo { path: path.clone(), source: e })?;
        Ok(Self { path, file })
    }

    pub async fn append(&mut self, event: &Event) -> Result<(), HookError> {
        let logged = LoggedEvent::from(event);
        let line = serde_json::to_string(&logged).unwrap_or_default();
        self.write_line(&line).await
    }

    pub async fn append_summary(&mut self, snapshot: &AggregatorSnapshot) -> Result<(), HookError> {
        self.write_line("--- summary ---").await?;
        self.write_line(&render_text_report(snapshot)).await
    }

    async fn write_line(&mut self, line: &str) -> Result<(), HookError> {
        self.file
            .write_all(line.as_bytes())
            .await
            .and_then(|_| Ok(()))
            .map_err(|e| HookError::LogIo { path: self.path.clone(), source: e })?;
        self.file
            .write_all(b"\n")
            .await
            .map_err(|e| HookError::LogIo { path: self.path.clone(), source: e })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::Aggregator;
    use memhook_common::Kind;

    #[test]
    fn report_ranks_by_call_count_and_bytes_descending() {
        let agg = Aggregator::new();
        agg.consume(&Event::new(0x1000, 0, 64, Kind::Malloc, &[0xAAAA]));
        agg.consume(&Event::new(0x2000, 0, 256, Kind::Malloc, &[0xBBBB]));
        agg.consume(&Event::new(0x3000, 0, 16, Kind::Malloc, &[0xBBBB]));
        let snapshot = agg.snapshot();
        let report = render_text_report(&snapshot);
        assert!(report.contains("current-allocations by call count"));
        // 0xBBBB has two calls, so it must be ranked above 0xAAAA in the
        // call-count section.
        let calls_section_start = report.find("by call count:\n").unwrap();
        let bbbb_pos = report[calls_section_start..].find("0xbbbb").unwrap();
        let aaaa_pos = report[calls_section_start..].find("0xaaaa").unwrap();
        assert!(bbbb_pos < aaaa_pos);
    }

    #[test]
    fn overflow_warning_only_appears_when_nonzero() {
        let agg = Aggregator::new();
        let snapshot = agg.snapshot();
        assert!(!render_text_report(&snapshot).contains("warning"));
        agg.note_ring_overflow(3);
        let snapshot = agg.snapshot();
        assert!(render_text_report(&snapshot).contains("warning: ring overflow count = 3"));
    }

    #[test]
    fn corruption_warning_only_appears_when_nonzero() {
        let agg = Aggregator::new();
        assert!(!render_text_report(&agg.snapshot()).contains("corruptions"));
        agg.note_ring_corruption();
        agg.note_ring_corruption();
        let report = render_text_report(&agg.snapshot());
        assert!(report.contains("warning: ring corruptions dropped = 2"));
    }

    #[tokio::test]
    async fn event_log_appends_one_line_per_event_plus_summary() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut log = EventLog::create(file.path()).await.unwrap();
        let agg = Aggregator::new();
        let event = Event::new(0x1000, 0, 64, Kind::Malloc, &[0xAAAA]);
        agg.consume(&event);
        log.append(&event).await.unwrap();
        log.append_summary(&agg.snapshot()).await.unwrap();
        let contents = tokio::fs::read_to_string(file.path()).await.unwrap();
        assert!(contents.lines().count() >= 2);
        assert!(contents.contains("--- summary ---"));
    }
}
