//! Exponential backoff for failed sends.

use chrono::Duration;
use leadflow_channels::SendErrorKind;
use leadflow_core::config::RetryConfig;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    pub multiplier: f64,
    /// Fraction of the delay applied as random +/- jitter.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_secs: config.base_delay_secs,
            max_delay_secs: config.max_delay_secs.max(config.base_delay_secs),
            multiplier: if config.multiplier < 1.0 { 1.0 } else { config.multiplier },
            jitter: config.jitter.clamp(0.0, 1.0),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn backoff_secs(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let raw = self.base_delay_secs as f64 * self.multiplier.powi(exponent);
        if !raw.is_finite() || raw >= self.max_delay_secs as f64 {
            self.max_delay_secs
        } else {
            raw.round() as u64
        }
    }

    /// Delay before retry number `attempt`, jittered and capped.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let base = self.backoff_secs(attempt) as f64;
        let secs = if self.jitter > 0.0 && base > 0.0 {
            let spread = base * self.jitter;
            let jittered = base + rand::thread_rng().gen_range(-spread..=spread);
            jittered.clamp(1.0, self.max_delay_secs.max(1) as f64)
        } else {
            base
        };
        Duration::milliseconds((secs * 1000.0) as i64)
    }

    /// `attempt` is the number of failures so far for the current step.
    pub fn should_retry(&self, attempt: u32, kind: SendErrorKind) -> bool {
        kind == SendErrorKind::Transient && attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: f64) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay_secs: 30,
            max_delay_secs: 200,
            multiplier: 2.0,
            jitter,
        }
    }

    #[test]
    fn test_backoff_grows_then_caps() {
        let p = policy(0.0);
        assert_eq!(p.backoff_secs(1), 30);
        assert_eq!(p.backoff_secs(2), 60);
        assert_eq!(p.backoff_secs(3), 120);
        assert_eq!(p.backoff_secs(4), 200);
        assert_eq!(p.backoff_secs(40), 200);
        assert_eq!(p.next_delay(2), Duration::seconds(60));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let p = policy(0.25);
        for _ in 0..50 {
            let d = p.next_delay(2).num_milliseconds();
            assert!((45_000..=75_000).contains(&d), "delay {d} out of band");
        }
    }

    #[test]
    fn test_should_retry() {
        let p = policy(0.0);
        assert!(p.should_retry(1, SendErrorKind::Transient));
        assert!(p.should_retry(3, SendErrorKind::Transient));
        assert!(!p.should_retry(4, SendErrorKind::Transient));
        assert!(!p.should_retry(1, SendErrorKind::Permanent));
    }

    #[test]
    fn test_from_config_sanitizes() {
        let p = RetryPolicy::from(&RetryConfig {
            max_attempts: 0,
            base_delay_secs: 10,
            max_delay_secs: 5,
            multiplier: 0.5,
            jitter: 3.0,
        });
        assert_eq!(p.max_attempts, 1);
        assert_eq!(p.max_delay_secs, 10);
        assert_eq!(p.multiplier, 1.0);
        assert_eq!(p.jitter, 1.0);
    }
}
