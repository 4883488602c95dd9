use chrono::{DateTime, Duration, Utc};
use leadflow_core::types::{CreateLeadRequest, Lead, LeadFilter, UpdateLeadRequest};
use leadflow_core::{LeadflowError, LeadflowResult};
use sqlx::types::Json;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::{db_err, from_ms, opt_from_ms, parse_text, to_ms};

#[derive(Debug, FromRow)]
struct LeadRow {
    id: Uuid,
    name: String,
    phone: String,
    email: Option<String>,
    status: String,
    source: Option<String>,
    tags: Json<Vec<String>>,
    notes: Option<String>,
    opted_out: bool,
    opted_out_at: Option<i64>,
    opt_out_reason: Option<String>,
    created_at: i64,
    updated_at: i64,
}

/// `updated_at` doubles as the row version, so every write must move it.
fn next_version(lead: &Lead) -> DateTime<Utc> {
    Utc::now().max(lead.updated_at + Duration::milliseconds(1))
}

impl TryFrom<LeadRow> for Lead {
    type Error = LeadflowError;

    fn try_from(row: LeadRow) -> LeadflowResult<Self> {
        Ok(Lead {
            id: row.id,
            name: row.name,
            phone: row.phone,
            email: row.email,
            status: parse_text("leads.status", &row.status)?,
            source: row.source,
            tags: row.tags.0,
            notes: row.notes,
            opted_out: row.opted_out,
            opted_out_at: opt_from_ms(row.opted_out_at),
            opt_out_reason: row.opt_out_reason,
            created_at: from_ms(row.created_at),
            updated_at: from_ms(row.updated_at),
        })
    }
}

const LEAD_COLUMNS: &str = "id, name, phone, email, status, source, tags, notes, opted_out, \
     opted_out_at, opt_out_reason, created_at, updated_at";

const UPDATE_ATTEMPTS: usize = 5;

/// Strip everything but digits so the same number always matches.
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

#[derive(Debug, Clone)]
pub struct LeadRepo {
    pool: SqlitePool,
}

impl LeadRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, req: CreateLeadRequest) -> LeadflowResult<Lead> {
        let name = req.name.trim().to_string();
        if name.is_empty() {
            return Err(LeadflowError::Validation("lead name must not be empty".into()));
        }
        let phone = normalize_phone(&req.phone);
        if phone.len() < 8 {
            return Err(LeadflowError::Validation(format!(
                "phone '{}' is not a valid number",
                req.phone
            )));
        }
        if self.find_by_phone(&phone).await?.is_some() {
            return Err(LeadflowError::Validation(format!(
                "a lead with phone {phone} already exists"
            )));
        }

        let now = Utc::now();
        let lead = Lead {
            id: Uuid::new_v4(),
            name,
            phone,
            email: req.email.filter(|e| !e.trim().is_empty()),
            status: req.status.unwrap_or_default(),
            source: req.source,
            tags: req.tags,
            notes: req.notes,
            opted_out: false,
            opted_out_at: None,
            opt_out_reason: None,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO leads (id, name, phone, email, status, source, tags, notes, opted_out, \
             created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(lead.id)
        .bind(&lead.name)
        .bind(&lead.phone)
        .bind(&lead.email)
        .bind(lead.status.as_str())
        .bind(&lead.source)
        .bind(Json(&lead.tags))
        .bind(&lead.notes)
        .bind(to_ms(now))
        .bind(to_ms(now))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        info!(lead_id = %lead.id, "Lead created");
        Ok(lead)
    }

    pub async fn get(&self, id: Uuid) -> LeadflowResult<Option<Lead>> {
        let sql = format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?");
        sqlx::query_as::<_, LeadRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(Lead::try_from)
            .transpose()
    }

    pub async fn require(&self, id: Uuid) -> LeadflowResult<Lead> {
        self.get(id)
            .await?
            .ok_or_else(|| LeadflowError::not_found("lead", id))
    }

    pub async fn find_by_phone(&self, phone: &str) -> LeadflowResult<Option<Lead>> {
        let sql = format!("SELECT {LEAD_COLUMNS} FROM leads WHERE phone = ?");
        sqlx::query_as::<_, LeadRow>(&sql)
            .bind(normalize_phone(phone))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(Lead::try_from)
            .transpose()
    }

    pub async fn list(&self, filter: &LeadFilter) -> LeadflowResult<Vec<Lead>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {LEAD_COLUMNS} FROM leads WHERE 1 = 1"));
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC");

        let rows: Vec<LeadRow> = qb
            .build_query_as::<LeadRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(Lead::try_from).collect()
    }

    /// Ids of every lead matching `filter`; used for segment enrolment.
    pub async fn ids_matching(&self, filter: &LeadFilter) -> LeadflowResult<Vec<Uuid>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT id FROM leads WHERE 1 = 1");
        push_filter(&mut qb, filter);
        qb.build_query_scalar::<Uuid>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)
    }

    /// Applies a partial update and returns `(before, after)`.
    ///
    /// The write is a compare-and-set on `updated_at`; when another writer
    /// got in between, the update is re-applied on the fresh row.
    pub async fn update(&self, id: Uuid, req: UpdateLeadRequest) -> LeadflowResult<(Lead, Lead)> {
        for _ in 0..UPDATE_ATTEMPTS {
            let before = self.require(id).await?;
            let lead = self.merge(&before, &req).await?;

            let result = sqlx::query(
                "UPDATE leads SET name = ?, phone = ?, email = ?, status = ?, source = ?, tags = ?, \
                 notes = ?, updated_at = ? WHERE id = ? AND updated_at = ?",
            )
            .bind(&lead.name)
            .bind(&lead.phone)
            .bind(&lead.email)
            .bind(lead.status.as_str())
            .bind(&lead.source)
            .bind(Json(&lead.tags))
            .bind(&lead.notes)
            .bind(to_ms(lead.updated_at))
            .bind(id)
            .bind(to_ms(before.updated_at))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

            if result.rows_affected() == 1 {
                return Ok((before, lead));
            }
            debug!(lead_id = %id, "Lead changed during update, retrying");
        }
        Err(LeadflowError::Validation(format!(
            "lead {id} is being modified concurrently, try again"
        )))
    }

    async fn merge(&self, before: &Lead, req: &UpdateLeadRequest) -> LeadflowResult<Lead> {
        let mut lead = before.clone();
        if let Some(name) = &req.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(LeadflowError::Validation("lead name must not be empty".into()));
            }
            lead.name = name;
        }
        if let Some(phone) = &req.phone {
            let phone = normalize_phone(phone);
            if phone.len() < 8 {
                return Err(LeadflowError::Validation(format!("phone '{phone}' is not valid")));
            }
            if phone != lead.phone && self.find_by_phone(&phone).await?.is_some() {
                return Err(LeadflowError::Validation(format!(
                    "a lead with phone {phone} already exists"
                )));
            }
            lead.phone = phone;
        }
        if let Some(email) = &req.email {
            lead.email = Some(email.clone()).filter(|e| !e.trim().is_empty());
        }
        if let Some(status) = req.status {
            lead.status = status;
        }
        if let Some(source) = &req.source {
            lead.source = Some(source.clone());
        }
        if let Some(tags) = &req.tags {
            lead.tags = tags.clone();
        }
        if let Some(notes) = &req.notes {
            lead.notes = Some(notes.clone());
        }
        lead.updated_at = next_version(before);
        Ok(lead)
    }

    /// Appends `tag` unless the lead already has it (case-insensitive), in a
    /// single statement so concurrent taggers cannot drop each other's tag.
    pub async fn add_tag(&self, id: Uuid, tag: &str) -> LeadflowResult<Lead> {
        sqlx::query(
            "UPDATE leads SET tags = json_insert(tags, '$[#]', ?), \
             updated_at = MAX(?, updated_at + 1) \
             WHERE id = ? AND NOT EXISTS \
             (SELECT 1 FROM json_each(leads.tags) WHERE lower(json_each.value) = lower(?))",
        )
        .bind(tag)
        .bind(to_ms(Utc::now()))
        .bind(id)
        .bind(tag)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        self.require(id).await
    }

    pub async fn delete(&self, id: Uuid) -> LeadflowResult<bool> {
        let result = sqlx::query("DELETE FROM leads WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    /// Engage the per-lead kill switch.
    pub async fn set_opt_out(&self, id: Uuid, reason: &str) -> LeadflowResult<Lead> {
        let now = to_ms(Utc::now());
        let result = sqlx::query(
            "UPDATE leads SET opted_out = 1, opted_out_at = COALESCE(opted_out_at, ?), \
             opt_out_reason = ?, updated_at = MAX(?, updated_at + 1) WHERE id = ?",
        )
        .bind(now)
        .bind(reason)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(LeadflowError::not_found("lead", id));
        }
        self.require(id).await
    }

    pub async fn clear_opt_out(&self, id: Uuid) -> LeadflowResult<Lead> {
        let result = sqlx::query(
            "UPDATE leads SET opted_out = 0, opted_out_at = NULL, opt_out_reason = NULL, \
             updated_at = MAX(?, updated_at + 1) WHERE id = ?",
        )
        .bind(to_ms(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(LeadflowError::not_found("lead", id));
        }
        self.require(id).await
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &LeadFilter) {
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(tag) = &filter.tag {
        qb.push(" AND EXISTS (SELECT 1 FROM json_each(leads.tags) WHERE lower(json_each.value) = lower(")
            .push_bind(tag.clone())
            .push("))");
    }
    if let Some(search) = &filter.search {
        let pattern = format!("%{}%", search.to_lowercase());
        qb.push(" AND (lower(name) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR phone LIKE ")
            .push_bind(pattern.clone())
            .push(" OR lower(COALESCE(email, '')) LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if !filter.include_opted_out {
        qb.push(" AND opted_out = 0");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use leadflow_core::types::LeadStatus;

    fn request(name: &str, phone: &str, tags: &[&str]) -> CreateLeadRequest {
        CreateLeadRequest {
            name: name.into(),
            phone: phone.into(),
            email: None,
            status: None,
            source: Some("import".into()),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            notes: None,
        }
    }

    async fn repo() -> LeadRepo {
        let db = Database::in_memory().await.unwrap();
        LeadRepo::new(db.pool().clone())
    }

    #[tokio::test]
    async fn test_create_normalizes_phone_and_rejects_duplicates() {
        let repo = repo().await;
        let lead = repo.create(request("Ana", "+55 (11) 99999-0001", &[])).await.unwrap();
        assert_eq!(lead.phone, "5511999990001");
        assert_eq!(lead.status, LeadStatus::New);

        let found = repo.find_by_phone("55 11 99999 0001").await.unwrap().unwrap();
        assert_eq!(found.id, lead.id);

        let dup = repo.create(request("Other", "5511999990001", &[])).await;
        assert!(matches!(dup, Err(LeadflowError::Validation(_))));
    }

    #[tokio::test]
    async fn test_rejects_short_phone_and_blank_name() {
        let repo = repo().await;
        assert!(repo.create(request("Ana", "123", &[])).await.is_err());
        assert!(repo.create(request("  ", "5511999990001", &[])).await.is_err());
    }

    #[tokio::test]
    async fn test_filter_by_tag_status_and_search() {
        let repo = repo().await;
        let a = repo.create(request("Ana Lima", "5511000000001", &["VIP"])).await.unwrap();
        repo.create(request("Bruno", "5511000000002", &["cold"])).await.unwrap();

        let vip = repo
            .list(&LeadFilter {
                tag: Some("vip".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(vip.len(), 1);
        assert_eq!(vip[0].id, a.id);

        repo.update(
            a.id,
            UpdateLeadRequest {
                status: Some(LeadStatus::Qualified),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let qualified = repo
            .list(&LeadFilter {
                status: Some(LeadStatus::Qualified),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(qualified.len(), 1);

        let search = repo
            .list(&LeadFilter {
                search: Some("bru".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(search.len(), 1);
        assert_eq!(search[0].name, "Bruno");
    }

    #[tokio::test]
    async fn test_opt_out_hides_lead_from_default_listing() {
        let repo = repo().await;
        let lead = repo.create(request("Ana", "5511000000001", &[])).await.unwrap();

        let opted = repo.set_opt_out(lead.id, "keyword:stop").await.unwrap();
        assert!(opted.opted_out);
        assert!(opted.opted_out_at.is_some());
        assert_eq!(opted.opt_out_reason.as_deref(), Some("keyword:stop"));

        assert!(repo.list(&LeadFilter::default()).await.unwrap().is_empty());
        let all = repo
            .list(&LeadFilter {
                include_opted_out: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 1);

        let back = repo.clear_opt_out(lead.id).await.unwrap();
        assert!(!back.opted_out);
        assert!(back.opted_out_at.is_none());
    }

    #[tokio::test]
    async fn test_add_tag_is_idempotent() {
        let repo = repo().await;
        let lead = repo.create(request("Ana", "5511000000001", &["a"])).await.unwrap();
        repo.add_tag(lead.id, "b").await.unwrap();
        let lead = repo.add_tag(lead.id, "B").await.unwrap();
        assert_eq!(lead.tags, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_tag_writers_keep_every_tag() {
        let repo = repo().await;
        let lead = repo.create(request("Ana", "5511000000001", &["a"])).await.unwrap();

        let (b, c, status) = tokio::join!(
            repo.add_tag(lead.id, "b"),
            repo.add_tag(lead.id, "c"),
            repo.update(
                lead.id,
                UpdateLeadRequest {
                    status: Some(LeadStatus::Contacted),
                    ..Default::default()
                },
            ),
        );
        b.unwrap();
        c.unwrap();
        status.unwrap();

        let stored = repo.require(lead.id).await.unwrap();
        let mut tags = stored.tags.clone();
        tags.sort();
        assert_eq!(tags, vec!["a", "b", "c"]);
        assert_eq!(stored.status, LeadStatus::Contacted);
    }

    #[tokio::test]
    async fn test_every_write_moves_updated_at() {
        let repo = repo().await;
        let lead = repo.create(request("Ana", "5511000000001", &[])).await.unwrap();
        let tagged = repo.add_tag(lead.id, "vip").await.unwrap();
        assert!(tagged.updated_at > lead.updated_at);
        let (_, renamed) = repo
            .update(
                lead.id,
                UpdateLeadRequest {
                    name: Some("Ana Souza".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(renamed.updated_at > tagged.updated_at);
        assert!(matches!(
            repo.add_tag(Uuid::new_v4(), "vip").await,
            Err(LeadflowError::NotFound { .. })
        ));
    }
}
