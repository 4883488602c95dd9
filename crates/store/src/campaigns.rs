use chrono::{DateTime, Utc};
use leadflow_core::types::{Campaign, CampaignStatus, CampaignStep, StepKind};
use leadflow_core::{LeadflowError, LeadflowResult};
use sqlx::{FromRow, SqlitePool};
use tracing::info;
use uuid::Uuid;

use crate::db::{db_err, from_ms, opt_from_ms, parse_text, to_ms};

#[derive(Debug, FromRow)]
struct CampaignRow {
    id: Uuid,
    name: String,
    description: String,
    status: String,
    scheduled_at: Option<i64>,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<CampaignRow> for Campaign {
    type Error = LeadflowError;

    fn try_from(row: CampaignRow) -> LeadflowResult<Self> {
        Ok(Campaign {
            id: row.id,
            name: row.name,
            description: row.description,
            status: parse_text("campaigns.status", &row.status)?,
            scheduled_at: opt_from_ms(row.scheduled_at),
            started_at: opt_from_ms(row.started_at),
            completed_at: opt_from_ms(row.completed_at),
            created_at: from_ms(row.created_at),
            updated_at: from_ms(row.updated_at),
        })
    }
}

#[derive(Debug, FromRow)]
struct StepRow {
    id: Uuid,
    campaign_id: Uuid,
    position: i64,
    kind: String,
    template: Option<String>,
    delay_secs: Option<i64>,
    created_at: i64,
}

impl TryFrom<StepRow> for CampaignStep {
    type Error = LeadflowError;

    fn try_from(row: StepRow) -> LeadflowResult<Self> {
        let kind = match row.kind.as_str() {
            "message" => StepKind::Message {
                template: row.template.unwrap_or_default(),
            },
            "wait" => {
                let delay = row.delay_secs.unwrap_or(0);
                StepKind::Wait {
                    delay_secs: u64::try_from(delay).map_err(|_| {
                        LeadflowError::Database(format!(
                            "column campaign_steps.delay_secs: negative delay {delay}"
                        ))
                    })?,
                }
            }
            other => {
                return Err(LeadflowError::Database(format!(
                    "column campaign_steps.kind: unknown step kind '{other}'"
                )))
            }
        };
        Ok(CampaignStep {
            id: row.id,
            campaign_id: row.campaign_id,
            position: row.position as u32,
            kind,
            created_at: from_ms(row.created_at),
        })
    }
}

const CAMPAIGN_COLUMNS: &str =
    "id, name, description, status, scheduled_at, started_at, completed_at, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct CampaignRepo {
    pool: SqlitePool,
}

impl CampaignRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        name: &str,
        description: &str,
        steps: &[StepKind],
    ) -> LeadflowResult<Campaign> {
        let now = Utc::now();
        let campaign = Campaign {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: description.to_string(),
            status: CampaignStatus::Draft,
            scheduled_at: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query(
            "INSERT INTO campaigns (id, name, description, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(campaign.id)
        .bind(&campaign.name)
        .bind(&campaign.description)
        .bind(campaign.status.as_str())
        .bind(to_ms(now))
        .bind(to_ms(now))
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        insert_steps(&mut tx, campaign.id, steps, now).await?;
        tx.commit().await.map_err(db_err)?;

        info!(campaign_id = %campaign.id, name = %campaign.name, steps = steps.len(), "Campaign created");
        Ok(campaign)
    }

    pub async fn get(&self, id: Uuid) -> LeadflowResult<Option<Campaign>> {
        let sql = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?");
        sqlx::query_as::<_, CampaignRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(Campaign::try_from)
            .transpose()
    }

    pub async fn require(&self, id: Uuid) -> LeadflowResult<Campaign> {
        self.get(id)
            .await?
            .ok_or_else(|| LeadflowError::not_found("campaign", id))
    }

    pub async fn list(&self, status: Option<CampaignStatus>) -> LeadflowResult<Vec<Campaign>> {
        let rows = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE status = ? ORDER BY created_at DESC"
                );
                sqlx::query_as::<_, CampaignRow>(&sql)
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let sql = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns ORDER BY created_at DESC");
                sqlx::query_as::<_, CampaignRow>(&sql)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(db_err)?;
        rows.into_iter().map(Campaign::try_from).collect()
    }

    pub async fn update(
        &self,
        id: Uuid,
        name: &str,
        description: &str,
    ) -> LeadflowResult<Campaign> {
        let result = sqlx::query(
            "UPDATE campaigns SET name = ?, description = ?, updated_at = ? WHERE id = ?",
        )
        .bind(name)
        .bind(description)
        .bind(to_ms(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(LeadflowError::not_found("campaign", id));
        }
        self.require(id).await
    }

    /// Persist a status change only if the row is still in `expected`.
    /// Returns `false` when another writer got there first.
    pub async fn set_status(
        &self,
        campaign: &Campaign,
        expected: CampaignStatus,
    ) -> LeadflowResult<bool> {
        let result = sqlx::query(
            "UPDATE campaigns SET status = ?, scheduled_at = ?, started_at = ?, completed_at = ?, \
             updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(campaign.status.as_str())
        .bind(campaign.scheduled_at.map(to_ms))
        .bind(campaign.started_at.map(to_ms))
        .bind(campaign.completed_at.map(to_ms))
        .bind(to_ms(campaign.updated_at))
        .bind(campaign.id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn delete(&self, id: Uuid) -> LeadflowResult<bool> {
        let result = sqlx::query("DELETE FROM campaigns WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn steps(&self, campaign_id: Uuid) -> LeadflowResult<Vec<CampaignStep>> {
        let rows = sqlx::query_as::<_, StepRow>(
            "SELECT id, campaign_id, position, kind, template, delay_secs, created_at \
             FROM campaign_steps WHERE campaign_id = ? ORDER BY position ASC",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(CampaignStep::try_from).collect()
    }

    /// Replace the whole step sequence; positions are renumbered from zero.
    pub async fn replace_steps(
        &self,
        campaign_id: Uuid,
        steps: &[StepKind],
    ) -> LeadflowResult<Vec<CampaignStep>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query("DELETE FROM campaign_steps WHERE campaign_id = ?")
            .bind(campaign_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        insert_steps(&mut tx, campaign_id, steps, now).await?;
        sqlx::query("UPDATE campaigns SET updated_at = ? WHERE id = ?")
            .bind(to_ms(now))
            .bind(campaign_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        self.steps(campaign_id).await
    }

    /// Append a step after the current last position.
    pub async fn add_step(&self, campaign_id: Uuid, step: &StepKind) -> LeadflowResult<CampaignStep> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let next: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM campaign_steps WHERE campaign_id = ?",
        )
        .bind(campaign_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        let (template, delay_secs) = step_columns(step)?;
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO campaign_steps (id, campaign_id, position, kind, template, delay_secs, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(campaign_id)
        .bind(next)
        .bind(step.label())
        .bind(template)
        .bind(delay_secs)
        .bind(to_ms(now))
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        Ok(CampaignStep {
            id,
            campaign_id,
            position: next as u32,
            kind: step.clone(),
            created_at: now,
        })
    }

    /// Scheduled campaigns whose start time has arrived.
    pub async fn due_scheduled(&self, now: DateTime<Utc>) -> LeadflowResult<Vec<Campaign>> {
        let sql = format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns \
             WHERE status = 'scheduled' AND scheduled_at IS NOT NULL AND scheduled_at <= ? \
             ORDER BY scheduled_at ASC"
        );
        let rows = sqlx::query_as::<_, CampaignRow>(&sql)
            .bind(to_ms(now))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(Campaign::try_from).collect()
    }

    /// Running campaigns that have an audience and nobody left to process.
    pub async fn finished_running(&self) -> LeadflowResult<Vec<Campaign>> {
        let sql = format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns c WHERE c.status = 'running' \
             AND EXISTS (SELECT 1 FROM campaign_audience a WHERE a.campaign_id = c.id) \
             AND NOT EXISTS (SELECT 1 FROM campaign_audience a WHERE a.campaign_id = c.id \
                 AND a.status IN ('pending', 'in_progress', 'waiting'))"
        );
        let rows = sqlx::query_as::<_, CampaignRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(Campaign::try_from).collect()
    }
}

fn step_columns(step: &StepKind) -> LeadflowResult<(Option<&str>, Option<i64>)> {
    match step {
        StepKind::Message { template } => Ok((Some(template.as_str()), None)),
        StepKind::Wait { delay_secs } => {
            let delay = i64::try_from(*delay_secs).map_err(|_| {
                LeadflowError::Validation(format!("wait delay {delay_secs}s is out of range"))
            })?;
            Ok((None, Some(delay)))
        }
    }
}

async fn insert_steps(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    campaign_id: Uuid,
    steps: &[StepKind],
    now: DateTime<Utc>,
) -> LeadflowResult<()> {
    for (position, step) in steps.iter().enumerate() {
        let (template, delay_secs) = step_columns(step)?;
        sqlx::query(
            "INSERT INTO campaign_steps (id, campaign_id, position, kind, template, delay_secs, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4())
        .bind(campaign_id)
        .bind(position as i64)
        .bind(step.label())
        .bind(template)
        .bind(delay_secs)
        .bind(to_ms(now))
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    }
    Ok(())
}
