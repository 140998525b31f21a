use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::stats::{mad_around, median};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Observation {
    at: DateTime<Utc>,
    value: f64,
}

/// Fixed-duration trailing buffer of timestamped observations.
///
/// Entries stay ordered by timestamp; a late value is placed in position.
/// Expired entries are dropped lazily from the front, on every insert and on
/// explicit `evict(now)`. An entry exactly `duration` old is still live;
/// anything strictly older is gone.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    duration: Duration,
    observations: VecDeque<Observation>,
    /// Newest timestamp ever inserted, so a late out-of-order value can't resurrect expired time.
    latest_at: Option<DateTime<Utc>>,
}

/// Serializable view of a window for debug output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowSummary {
    pub observations: usize,
    pub is_warm: bool,
    pub median: Option<f64>,
    pub mad: Option<f64>,
}

impl RollingWindow {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            observations: VecDeque::new(),
            latest_at: None,
        }
    }

    /// Adds an observation in timestamp order and evicts anything that fell
    /// out of the window.
    pub fn insert(&mut self, at: DateTime<Utc>, value: f64) {
        let latest = match self.latest_at {
            Some(prev) if prev > at => prev,
            _ => at,
        };
        self.latest_at = Some(latest);

        if at < latest - self.duration {
            return;
        }
        let pos = self.observations.partition_point(|o| o.at <= at);
        self.observations.insert(pos, Observation { at, value });
        self.evict(latest);
    }

    /// Drops entries older than `now - duration`. Returns how many were removed.
    pub fn evict(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.duration;
        let mut evicted = 0;
        while let Some(front) = self.observations.front() {
            if front.at >= cutoff {
                break;
            }
            self.observations.pop_front();
            evicted += 1;
        }
        evicted
    }

    pub fn count(&self) -> usize {
        self.observations.len()
    }

    pub fn is_warm(&self, min_observations: usize) -> bool {
        self.count() >= min_observations
    }

    /// Value with the newest timestamp.
    pub fn latest(&self) -> Option<f64> {
        self.observations.back().map(|o| o.value)
    }

    pub fn values(&self) -> Vec<f64> {
        self.observations.iter().map(|o| o.value).collect()
    }

    pub fn median(&self) -> Option<f64> {
        median(&self.values())
    }

    /// Median absolute deviation. `None` with fewer than 2 observations.
    pub fn mad(&self) -> Option<f64> {
        self.median_and_mad().map(|(_, mad)| mad)
    }

    /// Median and MAD from a single pass over the live values.
    pub fn median_and_mad(&self) -> Option<(f64, f64)> {
        if self.count() < 2 {
            return None;
        }
        let values = self.values();
        let med = median(&values)?;
        let mad = mad_around(&values, med)?;
        Some((med, mad))
    }

    pub fn summary(&self, min_observations: usize) -> WindowSummary {
        WindowSummary {
            observations: self.count(),
            is_warm: self.is_warm(min_observations),
            median: self.median(),
            mad: self.mad(),
        }
    }
}
