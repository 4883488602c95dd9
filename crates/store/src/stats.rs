use leadflow_core::types::{AudienceStatus, CampaignStats, CampaignStep, DeliveryStatus, StepReach};
use leadflow_core::LeadflowResult;
use sqlx::SqlitePool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::db::{db_err, parse_text};

/// Aggregates computed in SQL rather than by loading audiences.
#[derive(Debug, Clone)]
pub struct StatsRepo {
    pool: SqlitePool,
}

impl StatsRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn campaign_stats(
        &self,
        campaign_id: Uuid,
        steps: &[CampaignStep],
    ) -> LeadflowResult<CampaignStats> {
        let by_status: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM campaign_audience WHERE campaign_id = ? GROUP BY status",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut stats = CampaignStats {
            campaign_id,
            total: 0,
            pending: 0,
            in_progress: 0,
            waiting: 0,
            completed: 0,
            failed: 0,
            opted_out: 0,
            cancelled: 0,
            messages_sent: 0,
            messages_failed: 0,
            completion_rate: 0.0,
            step_reach: Vec::with_capacity(steps.len()),
        };
        for (status, count) in by_status {
            let count = count as u64;
            stats.total += count;
            match parse_text::<AudienceStatus>("campaign_audience.status", &status)? {
                AudienceStatus::Pending => stats.pending += count,
                AudienceStatus::InProgress => stats.in_progress += count,
                AudienceStatus::Waiting => stats.waiting += count,
                AudienceStatus::Completed => stats.completed += count,
                AudienceStatus::Failed => stats.failed += count,
                AudienceStatus::OptedOut => stats.opted_out += count,
                AudienceStatus::Cancelled => stats.cancelled += count,
            }
        }
        if stats.total > 0 {
            stats.completion_rate = stats.completed as f64 / stats.total as f64;
        }

        let by_delivery: Vec<(Option<i64>, String, i64)> = sqlx::query_as(
            "SELECT step_position, status, COUNT(*) FROM message_log \
             WHERE campaign_id = ? GROUP BY step_position, status",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut per_step: HashMap<u32, (u64, u64)> = HashMap::new();
        for (position, status, count) in by_delivery {
            let count = count as u64;
            let status: DeliveryStatus = parse_text("message_log.status", &status)?;
            match status {
                DeliveryStatus::Sent => stats.messages_sent += count,
                DeliveryStatus::Failed => stats.messages_failed += count,
            }
            if let Some(position) = position {
                let entry = per_step.entry(position as u32).or_default();
                match status {
                    DeliveryStatus::Sent => entry.0 += count,
                    DeliveryStatus::Failed => entry.1 += count,
                }
            }
        }

        // A member has reached step p once its cursor is at or past p.
        let by_position: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT current_step, COUNT(*) FROM campaign_audience \
             WHERE campaign_id = ? GROUP BY current_step",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        for step in steps {
            let reached = by_position
                .iter()
                .filter(|(current, _)| *current >= i64::from(step.position))
                .map(|(_, count)| *count as u64)
                .sum();
            let (sent, failed) = per_step.get(&step.position).copied().unwrap_or_default();
            stats.step_reach.push(StepReach {
                position: step.position,
                kind: step.kind.label().to_string(),
                reached,
                sent,
                failed,
            });
        }

        Ok(stats)
    }
}
