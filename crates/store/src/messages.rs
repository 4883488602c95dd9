use leadflow_core::types::{DeliveryStatus, MessageRecord};
use leadflow_core::{LeadflowError, LeadflowResult};
use sqlx::{FromRow, SqliteExecutor, SqlitePool};
use uuid::Uuid;

use crate::db::{db_err, from_ms, parse_text, to_ms};

#[derive(Debug, FromRow)]
struct MessageRow {
    id: Uuid,
    campaign_id: Option<Uuid>,
    audience_id: Option<Uuid>,
    lead_id: Uuid,
    step_position: Option<i64>,
    channel: String,
    body: String,
    status: String,
    provider_message_id: Option<String>,
    error: Option<String>,
    attempt: i64,
    created_at: i64,
}

impl TryFrom<MessageRow> for MessageRecord {
    type Error = LeadflowError;

    fn try_from(row: MessageRow) -> LeadflowResult<Self> {
        Ok(MessageRecord {
            id: row.id,
            campaign_id: row.campaign_id,
            audience_id: row.audience_id,
            lead_id: row.lead_id,
            step_position: row.step_position.map(|p| p as u32),
            channel: row.channel,
            body: row.body,
            status: parse_text("message_log.status", &row.status)?,
            provider_message_id: row.provider_message_id,
            error: row.error,
            attempt: row.attempt as u32,
            created_at: from_ms(row.created_at),
        })
    }
}

const MESSAGE_COLUMNS: &str = "id, campaign_id, audience_id, lead_id, step_position, channel, body, \
     status, provider_message_id, error, attempt, created_at";

/// Insert one log row on any executor, so callers can include it in their
/// own transaction.
pub(crate) async fn insert_message<'e, E>(executor: E, record: &MessageRecord) -> LeadflowResult<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO message_log (id, campaign_id, audience_id, lead_id, step_position, channel, \
         body, status, provider_message_id, error, attempt, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(record.id)
    .bind(record.campaign_id)
    .bind(record.audience_id)
    .bind(record.lead_id)
    .bind(record.step_position.map(i64::from))
    .bind(&record.channel)
    .bind(&record.body)
    .bind(record.status.as_str())
    .bind(&record.provider_message_id)
    .bind(&record.error)
    .bind(i64::from(record.attempt))
    .bind(to_ms(record.created_at))
    .execute(executor)
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Append-only record of every outbound attempt.
#[derive(Debug, Clone)]
pub struct MessageLog {
    pool: SqlitePool,
}

impl MessageLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, record: &MessageRecord) -> LeadflowResult<()> {
        insert_message(&self.pool, record).await
    }

    pub async fn list_for_lead(&self, lead_id: Uuid, limit: u32) -> LeadflowResult<Vec<MessageRecord>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM message_log WHERE lead_id = ? \
             ORDER BY created_at DESC LIMIT ?"
        );
        let rows = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(lead_id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(MessageRecord::try_from).collect()
    }

    pub async fn list_for_campaign(
        &self,
        campaign_id: Uuid,
        limit: u32,
    ) -> LeadflowResult<Vec<MessageRecord>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM message_log WHERE campaign_id = ? \
             ORDER BY created_at DESC LIMIT ?"
        );
        let rows = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(campaign_id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(MessageRecord::try_from).collect()
    }

    /// Whether a message for this audience step already went out.
    pub async fn has_sent(&self, audience_id: Uuid, step_position: u32) -> LeadflowResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM message_log WHERE audience_id = ? AND step_position = ? AND status = ? LIMIT 1",
        )
        .bind(audience_id)
        .bind(i64::from(step_position))
        .bind(DeliveryStatus::Sent.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::leads::LeadRepo;
    use chrono::Utc;
    use leadflow_core::types::CreateLeadRequest;

    fn record(lead_id: Uuid, audience_id: Uuid, status: DeliveryStatus) -> MessageRecord {
        MessageRecord {
            id: Uuid::new_v4(),
            campaign_id: None,
            audience_id: Some(audience_id),
            lead_id,
            step_position: Some(0),
            channel: "whatsapp".into(),
            body: "hello".into(),
            status,
            provider_message_id: None,
            error: None,
            attempt: 1,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_has_sent_ignores_failures() {
        let db = Database::in_memory().await.unwrap();
        let lead = LeadRepo::new(db.pool().clone())
            .create(CreateLeadRequest {
                name: "Ana".into(),
                phone: "+55 11 99999-0000".into(),
                email: None,
                status: None,
                source: None,
                tags: vec![],
                notes: None,
            })
            .await
            .unwrap();
        let log = MessageLog::new(db.pool().clone());
        let audience_id = Uuid::new_v4();

        log.record(&record(lead.id, audience_id, DeliveryStatus::Failed))
            .await
            .unwrap();
        assert!(!log.has_sent(audience_id, 0).await.unwrap());

        log.record(&record(lead.id, audience_id, DeliveryStatus::Sent))
            .await
            .unwrap();
        assert!(log.has_sent(audience_id, 0).await.unwrap());
        assert!(!log.has_sent(audience_id, 1).await.unwrap());

        assert_eq!(log.list_for_lead(lead.id, 10).await.unwrap().len(), 2);
    }
}
