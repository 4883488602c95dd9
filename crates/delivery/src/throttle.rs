//! Per-channel send rate limiting in fixed one-minute windows.

use chrono::{DateTime, Duration, DurationRound, Utc};
use dashmap::DashMap;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: DateTime<Utc>,
    count: u64,
}

pub struct MessageThrottler {
    max_per_minute: u64,
    windows: DashMap<String, Window>,
}

impl MessageThrottler {
    /// `max_per_minute == 0` disables throttling.
    pub fn new(max_per_minute: u64) -> Self {
        Self {
            max_per_minute,
            windows: DashMap::new(),
        }
    }

    /// Take one send slot. When the minute is used up, returns the start of
    /// the next window so the caller can defer instead of dropping.
    pub fn try_acquire(&self, channel: &str, now: DateTime<Utc>) -> Result<(), DateTime<Utc>> {
        if self.max_per_minute == 0 {
            return Ok(());
        }
        let minute = now
            .duration_trunc(Duration::minutes(1))
            .unwrap_or(now);

        let mut window = self.windows.entry(channel.to_string()).or_insert(Window {
            started: minute,
            count: 0,
        });
        if window.started != minute {
            window.started = minute;
            window.count = 0;
        }
        if window.count >= self.max_per_minute {
            return Err(minute + Duration::minutes(1));
        }
        window.count += 1;
        Ok(())
    }

    pub fn used(&self, channel: &str) -> u64 {
        self.windows.get(channel).map(|w| w.count).unwrap_or(0)
    }
}
