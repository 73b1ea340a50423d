use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Process-lifetime counters for the periodic text report. All fields are
/// atomic because the read loop, the hook-session lifecycle, and the report
/// timer update them from different tasks.
pub struct Metrics {
    pub start_time: SystemTime,
    events_consumed: AtomicU64,
    ring_overflows: AtomicU64,
    ring_corruptions: AtomicU64,
    poll_cycles: AtomicU64,
    hooks_patched: AtomicU64,
    hooks_failed: AtomicU64,
    hooks_leaked: AtomicU64,
    hooks_restored: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: SystemTime::now(),
            events_consumed: AtomicU64::new(0),
            ring_overflows: AtomicU64::new(0),
            ring_corruptions: AtomicU64::new(0),
            poll_cycles: AtomicU64::new(0),
            hooks_patched: AtomicU64::new(0),
            hooks_failed: AtomicU64::new(0),
            hooks_leaked: AtomicU64::new(0),
            hooks_restored: AtomicU64::new(0),
        }
    }

    pub fn inc_events_consumed(&self, n: u64) {
        self.events_consumed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn events_consumed(&self) -> u64 {
        self.events_consumed.load(Ordering::Relaxed)
    }

    pub fn set_ring_overflows(&self, value: u64) {
        self.ring_overflows.store(value, Ordering::Relaxed);
    }

    pub fn ring_overflows(&self) -> u64 {
        self.ring_overflows.load(Ordering::Relaxed)
    }

    pub fn inc_ring_corruption(&self) {
        self.ring_corruptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ring_corruptions(&self) -> u64 {
        self.ring_corruptions.load(Ordering::Relaxed)
    }

    pub fn inc_poll_cycle(&self) {
        self.poll_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn poll_cycles(&self) -> u64 {
        self.poll_cycles.load(Ordering::Relaxed)
    }

    pub fn inc_hooks_patched(&self) {
        self.hooks_patched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_hooks_failed(&self) {
        self.hooks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_hooks_leaked(&self) {
        self.hooks_leaked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_hooks_restored(&self) {
        self.hooks_restored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hooks_patched(&self) -> u64 {
        self.hooks_patched.load(Ordering::Relaxed)
    }

    pub fn hooks_failed(&self) -> u64 {
        self.hooks_failed.load(Ordering::Relaxed)
    }

    pub fn hooks_leaked(&self) -> u64 {
        self.hooks_leaked.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().map(|d| d.as_secs()).unwrap_or(0)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_accumulate() {
        let m = Metrics::new();
        assert_eq!(m.events_consumed(), 0);
        m.inc_events_consumed(5);
        m.inc_events_consumed(3);
        assert_eq!(m.events_consumed(), 8);
    }

    #[test]
    fn hook_lifecycle_counters_are_independent() {
        let m = Metrics::new();
        m.inc_hooks_patched();
        m.inc_hooks_patched();
        m.inc_hooks_failed();
        m.inc_hooks_leaked();
        assert_eq!(m.hooks_patched(), 2);
        assert_eq!(m.hooks_failed(), 1);
        assert_eq!(m.hooks_leaked(), 1);
    }
}
