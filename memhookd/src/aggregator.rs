//! Aggregator (component F). Consumes events, maintains live and
//! cumulative per-address and per-call-site statistics, matches frees to
//! prior allocations.
//!
//! Grounded on the teacher's `context::ContextStore` for the
//! `Mutex<HashMap>` live-entity shape, generalized from process lifecycle
//! tracking to allocation lifecycle tracking.

use memhook_common::{Event, Kind};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct LiveAllocation {
    pub size: u32,
    pub timestamp: u64,
    pub backtrace: Vec<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallSiteStats {
    pub calls: u64,
    pub total_bytes: u64,
}

impl CallSiteStats {
    fn add(&mut self, bytes: u64) {
        self.calls += 1;
        self.total_bytes += bytes;
    }

    fn subtract(&mut self, bytes: u64) {
        self.calls = self.calls.saturating_sub(1);
        self.total_bytes = self.total_bytes.saturating_sub(bytes);
    }
}

#[derive(Default)]
struct Tables {
    live: HashMap<u64, LiveAllocation>,
    current_allocations: HashMap<u64, CallSiteStats>,
    total_allocations: HashMap<u64, CallSiteStats>,
    current_frees: HashMap<u64, CallSiteStats>,
    total_frees: HashMap<u64, CallSiteStats>,
    live_bytes: u64,
    ring_overflow_seen: u64,
    ring_corruptions_seen: u64,
}

/// Consumes ring events in arrival order and maintains every statistic
/// spec §4.F and §8 describe. Internally single-`Mutex`-guarded, matching
/// the teacher's `ContextStore` pattern — one read-loop producer, any
/// number of report-timer readers.
pub struct Aggregator {
    tables: Mutex<Tables>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }

    /// Record the ring's current `overflow_count` so it can be surfaced as
    /// a warning line ahead of the next report.
    pub fn note_ring_overflow(&self, overflow_count: u64) {
        let mut tables = self.tables.lock().unwrap();
        tables.ring_overflow_seen = overflow_count;
    }

    pub fn ring_overflow_seen(&self) -> u64 {
        self.tables.lock().unwrap().ring_overflow_seen
    }

    /// Count one more corrupt slot dropped by the ring consumer, so it can
    /// be surfaced in the next report alongside the overflow count.
    pub fn note_ring_corruption(&self) {
        let mut tables = self.tables.lock().unwrap();
        tables.ring_corruptions_seen += 1;
    }

    pub fn ring_corruptions_seen(&self) -> u64 {
        self.tables.lock().unwrap().ring_corruptions_seen
    }

    pub fn consume(&self, event: &Event) {
        let Ok(kind) = event.decoded_kind() else {
            return;
        };
        let mut tables = self.tables.lock().unwrap();
        if kind.is_allocation() {
            Self::consume_allocation(&mut tables, event);
        } else {
            Self::consume_free(&mut tables, event);
        }
    }

    fn consume_allocation(tables: &mut Tables, event: &Event) {
        let backtrace = event.backtrace().to_vec();
        let size = event.size as u64;
        tables.live.insert(
            event.address,
            LiveAllocation {
                size: event.size,
                timestamp: event.timestamp,
                backtrace: backtrace.clone(),
            },
        );
        tables.live_bytes += size;
        for addr in &backtrace {
            tables.current_allocations.entry(*addr).or_default().add(size);
            tables.total_allocations.entry(*addr).or_default().add(size);
        }
    }

    fn consume_free(tables: &mut Tables, event: &Event) {
        match tables.live.remove(&event.address) {
            // Matched free: current-allocations is decremented using the
            // ORIGINAL allocation's backtrace and size, not the free's own.
            Some(allocation) => {
                tables.live_bytes = tables.live_bytes.saturating_sub(allocation.size as u64);
                for addr in &allocation.backtrace {
                    tables
                        .current_allocations
                        .entry(*addr)
                        .or_default()
                        .subtract(allocation.size as u64);
                }
                for addr in event.backtrace() {
                    tables.total_frees.entry(*addr).or_default().add(allocation.size as u64);
                    tables.current_frees.entry(*addr).or_default().add(allocation.size as u64);
                }
            }
            // Unmatched free: counted with size zero, does not affect
            // current-allocations or live bytes.
            None => {
                for addr in event.backtrace() {
                    tables.total_frees.entry(*addr).or_default().add(0);
                }
            }
        }
    }

    pub fn live_bytes(&self) -> u64 {
        self.tables.lock().unwrap().live_bytes
    }

    pub fn live_count(&self) -> usize {
        self.tables.lock().unwrap().live.len()
    }

    pub fn current_allocations(&self, addr: u64) -> CallSiteStats {
        self.tables
            .lock()
            .unwrap()
            .current_allocations
            .get(&addr)
            .copied()
            .unwrap_or_default()
    }

    pub fn total_allocations(&self, addr: u64) -> CallSiteStats {
        self.tables
            .lock()
            .unwrap()
            .total_allocations
            .get(&addr)
            .copied()
            .unwrap_or_default()
    }

    pub fn total_allocations_aggregate(&self) -> CallSiteStats {
        let tables = self.tables.lock().unwrap();
        tables
            .total_allocations
            .values()
            .fold(CallSiteStats::default(), |mut acc, stats| {
                acc.calls += stats.calls;
                acc.total_bytes += stats.total_bytes;
                acc
            })
    }

    pub fn total_frees(&self, addr: u64) -> CallSiteStats {
        self.tables.lock().unwrap().total_frees.get(&addr).copied().unwrap_or_default()
    }

    pub fn total_frees_aggregate(&self) -> CallSiteStats {
        let tables = self.tables.lock().unwrap();
        tables
            .total_frees
            .values()
            .fold(CallSiteStats::default(), |mut acc, stats| {
                acc.calls += stats.calls;
                acc.total_bytes += stats.total_bytes;
                acc
            })
    }

    /// Four ranked views for the scheduled report: current-allocations by
    /// call count, current-allocations by bytes, total-allocations (both
    /// orderings), total-frees (both orderings) — returned here as the raw
    /// maps; [`crate::report`] does the ranking and formatting.
    pub fn snapshot(&self) -> AggregatorSnapshot {
        let tables = self.tables.lock().unwrap();
        AggregatorSnapshot {
            live_bytes: tables.live_bytes,
            live_count: tables.live.len(),
            current_allocations: tables.current_allocations.clone(),
            total_allocations: tables.total_allocations.clone(),
            current_frees: tables.current_frees.clone(),
            total_frees: tables.total_frees.clone(),
            ring_overflow_seen: tables.ring_overflow_seen,
            ring_corruptions_seen: tables.ring_corruptions_seen,
        }
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct AggregatorSnapshot {
    pub live_bytes: u64,
    pub live_count: usize,
    pub current_allocations: HashMap<u64, CallSiteStats>,
    pub total_allocations: HashMap<u64, CallSiteStats>,
    pub current_frees: HashMap<u64, CallSiteStats>,
    pub total_frees: HashMap<u64, CallSiteStats>,
    pub ring_overflow_seen: u64,
    pub ring_corruptions_seen: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alloc(addr: u64, size: u32, backtrace: &[u64], kind: Kind) -> Event {
        Event::new(addr, 0, size, kind, backtrace)
    }

    fn free(addr: u64, backtrace: &[u64], kind: Kind) -> Event {
        Event::new(addr, 0, 0, kind, backtrace)
    }

    #[test]
    fn scenario_1_alloc_alloc_free_leaves_correct_totals() {
        let agg = Aggregator::new();
        agg.consume(&alloc(0x1000, 64, &[0xAAAA], Kind::Malloc));
        agg.consume(&alloc(0x2000, 128, &[0xBBBB], Kind::Malloc));
        agg.consume(&free(0x1000, &[0xCCCC], Kind::Free));

        assert_eq!(agg.live_bytes(), 128);
        let total = agg.total_allocations_aggregate();
        assert_eq!(total.calls, 2);
        assert_eq!(total.total_bytes, 192);
        let total_frees = agg.total_frees_aggregate();
        assert_eq!(total_frees.calls, 1);
        assert_eq!(total_frees.total_bytes, 64);
    }

    #[test]
    fn scenario_2_reallocation_at_same_address_has_no_leftover_live_entries() {
        let agg = Aggregator::new();
        agg.consume(&alloc(0x1000, 256, &[0xAAAA], Kind::Malloc));
        agg.consume(&free(0x1000, &[0xBBBB], Kind::Free));
        agg.consume(&alloc(0x1000, 512, &[0xCCCC], Kind::Malloc));
        agg.consume(&free(0x1000, &[0xDDDD], Kind::Free));

        assert_eq!(agg.live_bytes(), 0);
        assert_eq!(agg.live_count(), 0);
        assert_eq!(agg.total_frees_aggregate().calls, 2);
    }

    #[test]
    fn scenario_6_free_of_unknown_address_only_increments_total_frees() {
        let agg = Aggregator::new();
        agg.consume(&free(0xDEAD, &[0xEEEE], Kind::Free));

        assert_eq!(agg.live_bytes(), 0);
        assert_eq!(agg.current_allocations(0xEEEE), CallSiteStats::default());
        let total_frees = agg.total_frees(0xEEEE);
        assert_eq!(total_frees.calls, 1);
        assert_eq!(total_frees.total_bytes, 0);
    }

    #[test]
    fn matched_free_subtracts_using_the_original_allocations_backtrace() {
        let agg = Aggregator::new();
        agg.consume(&alloc(0x1000, 64, &[0xAAAA], Kind::Malloc));
        agg.consume(&free(0x1000, &[0xBBBB], Kind::Free));

        // current-allocations subtracted via the allocation's own backtrace.
        assert_eq!(agg.current_allocations(0xAAAA), CallSiteStats::default());
        // total-frees uses the free event's own backtrace, not the
        // allocation's.
        assert_eq!(agg.total_frees(0xBBBB).calls, 1);
        assert_eq!(agg.total_frees(0xAAAA).calls, 0);
    }

    #[test]
    fn zero_length_backtrace_does_not_touch_call_site_maps() {
        let agg = Aggregator::new();
        agg.consume(&alloc(0x1000, 64, &[], Kind::Malloc));
        assert_eq!(agg.live_bytes(), 64);
        assert_eq!(agg.total_allocations_aggregate().calls, 0);
    }

    #[test]
    fn backtrace_of_twenty_frames_all_contribute() {
        let agg = Aggregator::new();
        let frames: Vec<u64> = (1..=20).collect();
        agg.consume(&alloc(0x1000, 10, &frames, Kind::Malloc));
        for addr in &frames {
            assert_eq!(agg.total_allocations(*addr).calls, 1);
        }
    }

    #[test]
    fn current_allocations_equals_sum_of_live_allocation_sizes_referencing_it() {
        let agg = Aggregator::new();
        agg.consume(&alloc(0x1000, 64, &[0xAAAA], Kind::Malloc));
        agg.consume(&alloc(0x2000, 32, &[0xAAAA], Kind::Malloc));
        assert_eq!(agg.current_allocations(0xAAAA).total_bytes, 96);
        agg.consume(&free(0x1000, &[0xAAAA], Kind::Free));
        assert_eq!(agg.current_allocations(0xAAAA).total_bytes, 32);
    }
}
