//! Per-destination admission control: a concurrency cap plus a minimum
//! spacing between consecutive starts.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    pub max_concurrent: usize,
    pub min_interval_ms: u64,
}

impl LimiterConfig {
    pub fn new(max_concurrent: usize, min_interval_ms: u64) -> Self {
        Self {
            max_concurrent,
            min_interval_ms,
        }
    }

    pub fn min_interval(&self) -> Duration {
        interval(self.min_interval_ms)
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            min_interval_ms: 0,
        }
    }
}

fn interval(ms: u64) -> Duration {
    Duration::milliseconds(ms.min(i64::MAX as u64 / 1_000_000) as i64)
}

/// Live limiter state for one destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiter {
    pub max_concurrent: usize,
    pub min_interval_ms: u64,
    pub active_count: usize,
    pub last_execution_at: Option<DateTime<Utc>>,
}

impl RateLimiter {
    pub fn new(config: &LimiterConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent,
            min_interval_ms: config.min_interval_ms,
            active_count: 0,
            last_execution_at: None,
        }
    }

    /// Whether a new action could start at `now`.
    pub fn can_start(&self, now: DateTime<Utc>) -> bool {
        if self.active_count >= self.max_concurrent {
            return false;
        }
        match self.last_execution_at {
            Some(last) => now - last >= interval(self.min_interval_ms),
            None => true,
        }
    }

    /// Reserve a slot. Returns false, without changing anything, if none is free.
    pub fn acquire(&mut self, now: DateTime<Utc>) -> bool {
        if !self.can_start(now) {
            return false;
        }
        self.active_count += 1;
        self.last_execution_at = Some(now);
        true
    }

    pub fn release(&mut self) {
        debug_assert!(self.active_count > 0, "released a slot that was never acquired");
        self.active_count = self.active_count.saturating_sub(1);
    }

    pub fn utilization(&self) -> f64 {
        if self.max_concurrent == 0 {
            return 1.0;
        }
        self.active_count as f64 / self.max_concurrent as f64
    }
}
