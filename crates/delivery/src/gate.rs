use chrono::{DateTime, Utc};
use leadflow_core::config::DeliveryConfig;
use leadflow_core::types::Lead;
use tracing::debug;

use crate::kill_switch::{BlockReason, KillSwitch};
use crate::quiet_hours::QuietHours;
use crate::throttle::MessageThrottler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Allow,
    /// Not now; try again at the given instant.
    Defer(DateTime<Utc>),
    Blocked(BlockReason),
}

/// Decides whether one message may leave now. Checks run in the order kill
/// switch, quiet hours, throttle; a throttle slot is consumed only on
/// `Allow`.
pub struct DeliveryGate {
    channel: String,
    quiet_hours: Option<QuietHours>,
    throttler: MessageThrottler,
}

impl DeliveryGate {
    pub fn new(config: &DeliveryConfig, channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            quiet_hours: config.quiet_hours.as_ref().map(QuietHours::from),
            throttler: MessageThrottler::new(config.max_per_minute),
        }
    }

    /// No quiet hours, no throttle.
    pub fn permissive(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            quiet_hours: None,
            throttler: MessageThrottler::new(0),
        }
    }

    pub fn check(&self, lead: &Lead, global_kill: bool, now: DateTime<Utc>) -> Gate {
        if let Some(reason) = KillSwitch::check(lead, global_kill) {
            metrics::counter!("delivery.blocked", "reason" => reason.to_string()).increment(1);
            return Gate::Blocked(reason);
        }
        if let Some(until) = self.quiet_hours.as_ref().and_then(|q| q.next_allowed(now)) {
            debug!(lead_id = %lead.id, %until, "Quiet hours, deferring send");
            metrics::counter!("delivery.deferred", "reason" => "quiet_hours").increment(1);
            return Gate::Defer(until);
        }
        if let Err(until) = self.throttler.try_acquire(&self.channel, now) {
            debug!(lead_id = %lead.id, %until, "Send rate exhausted, deferring");
            metrics::counter!("delivery.deferred", "reason" => "throttle").increment(1);
            return Gate::Defer(until);
        }
        Gate::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};
    use leadflow_core::config::QuietHoursConfig;
    use leadflow_core::types::LeadStatus;
    use uuid::Uuid;

    fn lead(opted_out: bool) -> Lead {
        let now = Utc::now();
        Lead {
            id: Uuid::new_v4(),
            name: "Joao".into(),
            phone: "5511977776666".into(),
            email: None,
            status: LeadStatus::New,
            source: None,
            tags: vec![],
            notes: None,
            opted_out,
            opted_out_at: None,
            opt_out_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn gate(max_per_minute: u64) -> DeliveryGate {
        DeliveryGate::new(
            &DeliveryConfig {
                quiet_hours: Some(QuietHoursConfig {
                    start: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
                    end: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
                    utc_offset_minutes: 0,
                }),
                max_per_minute,
            },
            "whatsapp",
        )
    }

    #[test]
    fn test_opt_out_beats_global_switch() {
        let g = gate(10);
        let noon = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(
            g.check(&lead(true), true, noon),
            Gate::Blocked(BlockReason::LeadOptedOut)
        );
        assert_eq!(
            g.check(&lead(false), true, noon),
            Gate::Blocked(BlockReason::GlobalKillSwitch)
        );
    }

    #[test]
    fn test_quiet_hours_before_throttle() {
        let g = gate(1);
        let night = Utc.with_ymd_and_hms(2024, 5, 1, 23, 0, 0).unwrap();
        let morning = Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap();
        assert_eq!(g.check(&lead(false), false, night), Gate::Defer(morning));
        // Deferred checks must not eat the throttle budget.
        assert_eq!(g.check(&lead(false), false, morning), Gate::Allow);
        assert_eq!(
            g.check(&lead(false), false, morning),
            Gate::Defer(Utc.with_ymd_and_hms(2024, 5, 2, 8, 1, 0).unwrap())
        );
    }

    #[test]
    fn test_permissive_allows() {
        let g = DeliveryGate::permissive("whatsapp");
        let night = Utc.with_ymd_and_hms(2024, 5, 1, 23, 0, 0).unwrap();
        assert_eq!(g.check(&lead(false), false, night), Gate::Allow);
    }
}
