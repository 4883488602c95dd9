//! Per-lead campaign progress.
//!
//! Workers never hold progress in memory between ticks. A row is reserved by
//! writing a lease (`locked_until`, `lock_owner`) with a compare-and-set
//! update; progress is written back only by the lease holder.

use chrono::{DateTime, Duration, Utc};
use leadflow_core::types::{AudienceMember, AudienceStatus, EnrollOutcome, MessageRecord};
use leadflow_core::{LeadflowError, LeadflowResult};
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{db_err, from_ms, opt_from_ms, parse_text, to_ms};
use crate::messages::insert_message;

#[derive(Debug, FromRow)]
struct AudienceRow {
    id: Uuid,
    campaign_id: Uuid,
    lead_id: Uuid,
    status: String,
    current_step: i64,
    attempts: i64,
    next_run_at: i64,
    last_sent_at: Option<i64>,
    last_error: Option<String>,
    locked_until: Option<i64>,
    lock_owner: Option<String>,
    enrolled_at: i64,
    updated_at: i64,
    completed_at: Option<i64>,
}

impl TryFrom<AudienceRow> for AudienceMember {
    type Error = LeadflowError;

    fn try_from(row: AudienceRow) -> LeadflowResult<Self> {
        Ok(AudienceMember {
            id: row.id,
            campaign_id: row.campaign_id,
            lead_id: row.lead_id,
            status: parse_text("campaign_audience.status", &row.status)?,
            current_step: row.current_step.max(0) as u32,
            attempts: row.attempts.max(0) as u32,
            next_run_at: from_ms(row.next_run_at),
            last_sent_at: opt_from_ms(row.last_sent_at),
            last_error: row.last_error,
            locked_until: opt_from_ms(row.locked_until),
            lock_owner: row.lock_owner,
            enrolled_at: from_ms(row.enrolled_at),
            updated_at: from_ms(row.updated_at),
            completed_at: opt_from_ms(row.completed_at),
        })
    }
}

const AUDIENCE_COLUMNS: &str = "id, campaign_id, lead_id, status, current_step, attempts, \
     next_run_at, last_sent_at, last_error, locked_until, lock_owner, enrolled_at, updated_at, \
     completed_at";

const ACTIVE_STATUSES: &str = "('pending', 'in_progress', 'waiting')";

#[derive(Debug, Clone)]
pub struct AudienceRepo {
    pool: SqlitePool,
}

impl AudienceRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Add leads to a campaign. Re-enrolling a lead is a no-op; opted-out
    /// and unknown leads are counted and skipped.
    pub async fn enroll(
        &self,
        campaign_id: Uuid,
        lead_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> LeadflowResult<EnrollOutcome> {
        let mut outcome = EnrollOutcome::default();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        for lead_id in lead_ids {
            let opted_out: Option<bool> =
                sqlx::query_scalar("SELECT opted_out FROM leads WHERE id = ?")
                    .bind(lead_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db_err)?;
            match opted_out {
                None => {
                    outcome.unknown_leads += 1;
                    continue;
                }
                Some(true) => {
                    outcome.skipped_opted_out += 1;
                    continue;
                }
                Some(false) => {}
            }

            let result = sqlx::query(
                "INSERT INTO campaign_audience (id, campaign_id, lead_id, status, current_step, \
                 attempts, next_run_at, enrolled_at, updated_at) \
                 VALUES (?, ?, ?, 'pending', 0, 0, ?, ?, ?) \
                 ON CONFLICT (campaign_id, lead_id) DO NOTHING",
            )
            .bind(Uuid::new_v4())
            .bind(campaign_id)
            .bind(lead_id)
            .bind(to_ms(now))
            .bind(to_ms(now))
            .bind(to_ms(now))
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            if result.rows_affected() == 1 {
                outcome.enrolled += 1;
            } else {
                outcome.already_enrolled += 1;
            }
        }

        tx.commit().await.map_err(db_err)?;
        info!(
            campaign_id = %campaign_id,
            enrolled = outcome.enrolled,
            already_enrolled = outcome.already_enrolled,
            skipped_opted_out = outcome.skipped_opted_out,
            unknown = outcome.unknown_leads,
            "Audience enrolled"
        );
        Ok(outcome)
    }

    pub async fn get(&self, id: Uuid) -> LeadflowResult<Option<AudienceMember>> {
        let sql = format!("SELECT {AUDIENCE_COLUMNS} FROM campaign_audience WHERE id = ?");
        sqlx::query_as::<_, AudienceRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(AudienceMember::try_from)
            .transpose()
    }

    pub async fn find(
        &self,
        campaign_id: Uuid,
        lead_id: Uuid,
    ) -> LeadflowResult<Option<AudienceMember>> {
        let sql = format!(
            "SELECT {AUDIENCE_COLUMNS} FROM campaign_audience WHERE campaign_id = ? AND lead_id = ?"
        );
        sqlx::query_as::<_, AudienceRow>(&sql)
            .bind(campaign_id)
            .bind(lead_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(AudienceMember::try_from)
            .transpose()
    }

    pub async fn list(
        &self,
        campaign_id: Uuid,
        status: Option<AudienceStatus>,
    ) -> LeadflowResult<Vec<AudienceMember>> {
        let rows = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {AUDIENCE_COLUMNS} FROM campaign_audience \
                     WHERE campaign_id = ? AND status = ? ORDER BY enrolled_at ASC"
                );
                sqlx::query_as::<_, AudienceRow>(&sql)
                    .bind(campaign_id)
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let sql = format!(
                    "SELECT {AUDIENCE_COLUMNS} FROM campaign_audience \
                     WHERE campaign_id = ? ORDER BY enrolled_at ASC"
                );
                sqlx::query_as::<_, AudienceRow>(&sql)
                    .bind(campaign_id)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(db_err)?;
        rows.into_iter().map(AudienceMember::try_from).collect()
    }

    /// Reserve up to `limit` due members of running campaigns for `owner`.
    ///
    /// Candidates are selected first and then claimed one by one with a
    /// conditional update; a row another worker claimed in between is
    /// simply skipped.
    pub async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
        owner: &str,
        lease: Duration,
    ) -> LeadflowResult<Vec<AudienceMember>> {
        let now_ms = to_ms(now);
        let sql = format!(
            "SELECT a.id FROM campaign_audience a \
             JOIN campaigns c ON c.id = a.campaign_id \
             WHERE c.status = 'running' \
               AND a.status IN {ACTIVE_STATUSES} \
               AND a.next_run_at <= ? \
               AND (a.locked_until IS NULL OR a.locked_until <= ?) \
             ORDER BY a.next_run_at ASC \
             LIMIT ?"
        );
        let candidates: Vec<Uuid> = sqlx::query_scalar(&sql)
            .bind(now_ms)
            .bind(now_ms)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let locked_until = to_ms(now + lease);
        let mut claimed = Vec::with_capacity(candidates.len());
        for id in candidates {
            let result = sqlx::query(
                "UPDATE campaign_audience SET locked_until = ?, lock_owner = ? \
                 WHERE id = ? AND (locked_until IS NULL OR locked_until <= ?)",
            )
            .bind(locked_until)
            .bind(owner)
            .bind(id)
            .bind(now_ms)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

            if result.rows_affected() != 1 {
                debug!(audience_id = %id, "Audience row claimed by another worker");
                continue;
            }
            if let Some(member) = self.get(id).await? {
                claimed.push(member);
            }
        }
        Ok(claimed)
    }

    /// Push a held lease out to `until` before a send.
    ///
    /// `held_until` is the lease this worker wrote; the update only applies
    /// while the row still carries it, so a row that expired and was claimed
    /// again (by anyone, same owner included) returns `false`.
    pub async fn extend_lease(
        &self,
        id: Uuid,
        owner: &str,
        held_until: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> LeadflowResult<bool> {
        let result = sqlx::query(
            "UPDATE campaign_audience SET locked_until = ? \
             WHERE id = ? AND lock_owner = ? AND locked_until = ?",
        )
        .bind(to_ms(until))
        .bind(id)
        .bind(owner)
        .bind(to_ms(held_until))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    /// Write back a member's progress together with the messages logged
    /// while advancing it, and drop the lease.
    ///
    /// Returns `false` when `owner` no longer holds the lease; the message
    /// rows are still kept since those sends really happened.
    pub async fn save_progress(
        &self,
        member: &AudienceMember,
        owner: &str,
        messages: &[MessageRecord],
    ) -> LeadflowResult<bool> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for record in messages {
            insert_message(&mut *tx, record).await?;
        }

        let result = sqlx::query(
            "UPDATE campaign_audience SET status = ?, current_step = ?, attempts = ?, \
             next_run_at = ?, last_sent_at = ?, last_error = ?, completed_at = ?, updated_at = ?, \
             locked_until = NULL, lock_owner = NULL \
             WHERE id = ? AND lock_owner = ?",
        )
        .bind(member.status.as_str())
        .bind(i64::from(member.current_step))
        .bind(i64::from(member.attempts))
        .bind(to_ms(member.next_run_at))
        .bind(member.last_sent_at.map(to_ms))
        .bind(&member.last_error)
        .bind(member.completed_at.map(to_ms))
        .bind(to_ms(member.updated_at))
        .bind(member.id)
        .bind(owner)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        let saved = result.rows_affected() == 1;
        if !saved {
            warn!(audience_id = %member.id, owner, "Lease lost before progress was saved");
        }
        Ok(saved)
    }

    pub async fn release(&self, id: Uuid, owner: &str) -> LeadflowResult<()> {
        sqlx::query(
            "UPDATE campaign_audience SET locked_until = NULL, lock_owner = NULL \
             WHERE id = ? AND lock_owner = ?",
        )
        .bind(id)
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Every active membership of the lead becomes `opted_out`.
    pub async fn mark_opted_out_for_lead(
        &self,
        lead_id: Uuid,
        now: DateTime<Utc>,
    ) -> LeadflowResult<Vec<Uuid>> {
        let sql = format!(
            "UPDATE campaign_audience SET status = 'opted_out', completed_at = ?, updated_at = ?, \
             locked_until = NULL, lock_owner = NULL \
             WHERE lead_id = ? AND status IN {ACTIVE_STATUSES} RETURNING campaign_id"
        );
        sqlx::query_scalar(&sql)
            .bind(to_ms(now))
            .bind(to_ms(now))
            .bind(lead_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)
    }

    pub async fn cancel_for_campaign(
        &self,
        campaign_id: Uuid,
        now: DateTime<Utc>,
    ) -> LeadflowResult<u64> {
        let sql = format!(
            "UPDATE campaign_audience SET status = 'cancelled', completed_at = ?, updated_at = ?, \
             locked_until = NULL, lock_owner = NULL \
             WHERE campaign_id = ? AND status IN {ACTIVE_STATUSES}"
        );
        let result = sqlx::query(&sql)
            .bind(to_ms(now))
            .bind(to_ms(now))
            .bind(campaign_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    /// Put failed members back in line at the step that failed.
    pub async fn retry_failed(&self, campaign_id: Uuid, now: DateTime<Utc>) -> LeadflowResult<u64> {
        let result = sqlx::query(
            "UPDATE campaign_audience SET status = 'in_progress', attempts = 0, next_run_at = ?, \
             last_error = NULL, completed_at = NULL, updated_at = ? \
             WHERE campaign_id = ? AND status = 'failed'",
        )
        .bind(to_ms(now))
        .bind(to_ms(now))
        .bind(campaign_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    pub async fn remove(&self, campaign_id: Uuid, lead_id: Uuid) -> LeadflowResult<bool> {
        let result = sqlx::query("DELETE FROM campaign_audience WHERE campaign_id = ? AND lead_id = ?")
            .bind(campaign_id)
            .bind(lead_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_non_terminal(&self, campaign_id: Uuid) -> LeadflowResult<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM campaign_audience WHERE campaign_id = ? AND status IN {ACTIVE_STATUSES}"
        );
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(campaign_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(count as u64)
    }
}
