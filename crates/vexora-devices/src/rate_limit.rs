//! Per (device, metric) write throttling for telemetry.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Default number of tracked keys above which stale entries are pruned.
pub const DEFAULT_SOFT_CAPACITY: usize = 100_000;

/// Remembers the last accepted write per `deviceId|metric` key and rejects
/// writes that arrive sooner than the configured minimum interval.
///
/// Timestamps are the device-reported sample times in unix milliseconds.
/// A sample older than the recorded one means the device clock went back and
/// restarts the window for that key, so a bogus future timestamp cannot mute a
/// metric. Entries that suppress nothing (older than the interval, or ahead of
/// the sample) are pruned once the map reaches its soft capacity.
pub struct RateLimiter {
    min_interval_ms: i64,
    soft_capacity: usize,
    last_accepted: Mutex<HashMap<String, i64>>,
}

impl RateLimiter {
    /// `min_interval_ms == 0` disables limiting.
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            min_interval_ms: i64::try_from(min_interval_ms).unwrap_or(i64::MAX),
            soft_capacity: DEFAULT_SOFT_CAPACITY,
            last_accepted: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_soft_capacity(mut self, soft_capacity: usize) -> Self {
        self.soft_capacity = soft_capacity.max(1);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.min_interval_ms > 0
    }

    pub fn min_interval_ms(&self) -> i64 {
        self.min_interval_ms
    }

    /// Decide whether a sample taken at `at_ms` may be written, recording it
    /// when accepted.
    pub fn allow(&self, device_id: &str, metric_key: &str, at_ms: i64) -> bool {
        if !self.is_enabled() {
            return true;
        }

        let key = format!("{device_id}|{metric_key}");
        let mut last_accepted = self.last_accepted.lock();

        if let Some(last) = last_accepted.get_mut(&key) {
            let elapsed = at_ms.saturating_sub(*last);
            if (0..self.min_interval_ms).contains(&elapsed) {
                return false;
            }
            *last = at_ms;
            return true;
        }

        if last_accepted.len() >= self.soft_capacity {
            let before = last_accepted.len();
            let min_interval_ms = self.min_interval_ms;
            last_accepted
                .retain(|_, last| (0..min_interval_ms).contains(&at_ms.saturating_sub(*last)));
            tracing::debug!(
                pruned = before - last_accepted.len(),
                remaining = last_accepted.len(),
                "rate limiter pruned stale entries"
            );
        }
        last_accepted.insert(key, at_ms);
        true
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.last_accepted.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
