//! Business-wide do-not-disturb window.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use leadflow_core::config::QuietHoursConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub utc_offset: Duration,
}

impl From<&QuietHoursConfig> for QuietHours {
    fn from(config: &QuietHoursConfig) -> Self {
        Self {
            start: config.start,
            end: config.end,
            utc_offset: Duration::minutes(i64::from(config.utc_offset_minutes)),
        }
    }
}

impl QuietHours {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            start,
            end,
            utc_offset: Duration::zero(),
        }
    }

    /// `None` when sending is allowed at `now`, otherwise the instant the
    /// quiet window ends. Windows with `start > end` wrap midnight; an empty
    /// window (`start == end`) never blocks.
    pub fn next_allowed(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.start == self.end {
            return None;
        }
        let local = now.naive_utc() + self.utc_offset;
        let time = local.time();
        let today = local.date();

        let end_date = if self.start < self.end {
            if time < self.start || time >= self.end {
                return None;
            }
            today
        } else if time >= self.start {
            today.succ_opt()?
        } else if time < self.end {
            today
        } else {
            return None;
        };

        let end_local = end_date.and_time(self.end);
        Some((end_local - self.utc_offset).and_utc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, h, m, 0).unwrap()
    }

    fn t(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    #[test]
    fn test_same_day_window() {
        let quiet = QuietHours::new(t(12), t(14));
        assert_eq!(quiet.next_allowed(at(11, 59)), None);
        assert_eq!(quiet.next_allowed(at(13, 0)), Some(at(14, 0)));
        assert_eq!(quiet.next_allowed(at(14, 0)), None);
    }

    #[test]
    fn test_window_wraps_midnight() {
        let quiet = QuietHours::new(t(22), t(8));
        assert_eq!(quiet.next_allowed(at(21, 0)), None);
        assert_eq!(
            quiet.next_allowed(at(23, 30)),
            Some(Utc.with_ymd_and_hms(2024, 3, 11, 8, 0, 0).unwrap())
        );
        assert_eq!(quiet.next_allowed(at(3, 0)), Some(at(8, 0)));
        assert_eq!(quiet.next_allowed(at(8, 0)), None);
    }

    #[test]
    fn test_offset_applies_local_time() {
        // 22:00-08:00 at UTC-3: 02:00 UTC is 23:00 local.
        let quiet = QuietHours {
            start: t(22),
            end: t(8),
            utc_offset: Duration::hours(-3),
        };
        assert_eq!(quiet.next_allowed(at(2, 0)), Some(at(11, 0)));
        assert_eq!(quiet.next_allowed(at(12, 0)), None);
    }

    #[test]
    fn test_empty_window_never_blocks() {
        assert_eq!(QuietHours::new(t(9), t(9)).next_allowed(at(9, 0)), None);
    }
}
