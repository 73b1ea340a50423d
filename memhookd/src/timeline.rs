//! Timeline View (component G). A pure sink over `(time, cumulative_bytes,
//! kind)` samples; the actual plotting surface is the out-of-scope external
//! collaborator spec.md names. This module is the seam such a surface would
//! implement against.

use memhook_common::Kind;
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub at: Duration,
    pub cumulative_bytes: u64,
    pub kind: Kind,
}

pub trait TimelineSink {
    fn add_event(&mut self, at: Duration, cumulative_bytes: u64, kind: Kind);
    fn update(&mut self);
}

/// A rolling-window timeline that tracks whether the viewport still
/// contains the most recent sample. Auto-scroll disengages once the user
/// pans away and stays disengaged until the viewport catches back up.
pub struct RollingTimeline {
    window: Duration,
    samples: VecDeque<Sample>,
    auto_scroll: bool,
    viewport_end: Option<Duration>,
}

impl RollingTimeline {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
            auto_scroll: true,
            viewport_end: None,
        }
    }

    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn auto_scroll_engaged(&self) -> bool {
        self.auto_scroll
    }

    /// The user moved the viewport to end at `end`. Auto-scroll disengages
    /// unless `end` still contains the latest sample.
    pub fn pan_to(&mut self, end: Duration) {
        self.viewport_end = Some(end);
        self.auto_scroll = match self.samples.back() {
            Some(latest) => end >= latest.at,
            None => true,
        };
    }

    fn evict_outside_window(&mut self) {
        let Some(latest) = self.samples.back().map(|s| s.at) else {
            return;
        };
        let cutoff = latest.saturating_sub(self.window);
        while let Some(front) = self.samples.front() {
            if front.at < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

impl TimelineSink for RollingTimeline {
    fn add_event(&mut self, at: Duration, cumulative_bytes: u64, kind: Kind) {
        self.samples.push_back(Sample { at, cumulative_bytes, kind });
        self.evict_outside_window();
        if self.auto_scroll {
            self.viewport_end = Some(at);
        }
    }

    fn update(&mut self) {
        if self.auto_scroll {
            if let Some(latest) = self.samples.back() {
                self.viewport_end = Some(latest.at);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_scroll_stays_engaged_while_untouched() {
        let mut timeline = RollingTimeline::new(Duration::from_secs(32));
        timeline.add_event(Duration::from_secs(1), 64, Kind::Malloc);
        timeline.add_event(Duration::from_secs(2), 128, Kind::Malloc);
        assert!(timeline.auto_scroll_engaged());
    }

    #[test]
    fn panning_away_from_latest_sample_disengages_auto_scroll() {
        let mut timeline = RollingTimeline::new(Duration::from_secs(32));
        timeline.add_event(Duration::from_secs(1), 64, Kind::Malloc);
        timeline.add_event(Duration::from_secs(10), 128, Kind::Malloc);
        timeline.pan_to(Duration::from_secs(5));
        assert!(!timeline.auto_scroll_engaged());
    }

    #[test]
    fn panning_back_to_the_latest_sample_reengages_auto_scroll() {
        let mut timeline = RollingTimeline::new(Duration::from_secs(32));
        timeline.add_event(Duration::from_secs(1), 64, Kind::Malloc);
        timeline.add_event(Duration::from_secs(10), 128, Kind::Malloc);
        timeline.pan_to(Duration::from_secs(5));
        timeline.pan_to(Duration::from_secs(10));
        assert!(timeline.auto_scroll_engaged());
    }

    #[test]
    fn samples_older_than_the_window_are_evicted() {
        let mut timeline = RollingTimeline::new(Duration::from_secs(5));
        timeline.add_event(Duration::from_secs(0), 10, Kind::Malloc);
        timeline.add_event(Duration::from_secs(10), 20, Kind::Malloc);
        let remaining: Vec<_> = timeline.samples().map(|s| s.at.as_secs()).collect();
        assert_eq!(remaining, vec![10]);
    }
}
