//! Bounded time-series rings for aggregate metrics

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One time-stamped sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimePoint {
    pub at: DateTime<Utc>,
    pub value: f64,
}

/// Fixed-capacity ring of samples, oldest evicted on overflow.
///
/// Instants are monotone non-decreasing; a sample stamped earlier than the
/// newest one is clamped forward rather than reordering the series.
#[derive(Debug, Clone)]
pub struct MetricsHistory {
    capacity: usize,
    points: VecDeque<TimePoint>,
}

impl MetricsHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            points: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// Append a sample stamped now.
    pub fn append(&mut self, value: f64) {
        self.append_at(Utc::now(), value);
    }

    /// Append a sample with a caller-provided instant, so one refresh can
    /// stamp all series identically.
    pub fn append_at(&mut self, at: DateTime<Utc>, value: f64) {
        let at = match self.points.back() {
            Some(last) if at < last.at => last.at,
            _ => at,
        };
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(TimePoint { at, value });
    }

    /// Samples oldest to newest.
    pub fn values(&self) -> Vec<TimePoint> {
        self.points.iter().copied().collect()
    }

    pub fn latest(&self) -> Option<TimePoint> {
        self.points.back().copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}

/// Derives a per-second rate from a cumulative byte counter.
///
/// The first sample after construction or a counter reset produces no
/// emission; rates are clipped at zero.
#[derive(Debug, Clone, Default)]
pub struct RateTracker {
    previous: Option<(DateTime<Utc>, u64)>,
}

impl RateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next counter observation; returns bytes/second when a rate
    /// can be derived.
    pub fn update(&mut self, at: DateTime<Utc>, counter: u64) -> Option<f64> {
        let rate = match self.previous {
            Some((prev_at, prev_counter)) => {
                let elapsed = (at - prev_at).num_milliseconds() as f64 / 1000.0;
                if elapsed <= 0.0 || counter < prev_counter {
                    // counter reset (container restart or churn)
                    None
                } else {
                    Some((counter - prev_counter) as f64 / elapsed)
                }
            }
            None => None,
        };
        self.previous = Some((at, counter));
        rate
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}
