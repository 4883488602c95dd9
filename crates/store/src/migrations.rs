//! Versioned schema migrations.
//!
//! Each migration runs inside its own transaction and records its version in
//! `schema_version`, so re-running is a no-op. Never edit a released
//! migration; append a new one.

use leadflow_core::{LeadflowError, LeadflowResult};
use sqlx::SqlitePool;
use tracing::info;

use crate::db::{db_err, to_ms};

pub const CURRENT_SCHEMA_VERSION: i64 = 2;

const V1_CORE_TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS leads (
        id BLOB PRIMARY KEY,
        name TEXT NOT NULL,
        phone TEXT NOT NULL UNIQUE,
        email TEXT,
        status TEXT NOT NULL DEFAULT 'new',
        source TEXT,
        tags TEXT NOT NULL DEFAULT '[]',
        notes TEXT,
        opted_out INTEGER NOT NULL DEFAULT 0,
        opted_out_at INTEGER,
        opt_out_reason TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_leads_status ON leads(status)",
    r#"
    CREATE TABLE IF NOT EXISTS campaigns (
        id BLOB PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'draft',
        scheduled_at INTEGER,
        started_at INTEGER,
        completed_at INTEGER,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS campaign_steps (
        id BLOB PRIMARY KEY,
        campaign_id BLOB NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
        position INTEGER NOT NULL,
        kind TEXT NOT NULL,
        template TEXT,
        delay_secs INTEGER,
        created_at INTEGER NOT NULL,
        UNIQUE (campaign_id, position)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS campaign_audience (
        id BLOB PRIMARY KEY,
        campaign_id BLOB NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
        lead_id BLOB NOT NULL REFERENCES leads(id) ON DELETE CASCADE,
        status TEXT NOT NULL DEFAULT 'pending',
        current_step INTEGER NOT NULL DEFAULT 0,
        attempts INTEGER NOT NULL DEFAULT 0,
        next_run_at INTEGER NOT NULL,
        last_sent_at INTEGER,
        last_error TEXT,
        locked_until INTEGER,
        lock_owner TEXT,
        enrolled_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        completed_at INTEGER,
        UNIQUE (campaign_id, lead_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_audience_due ON campaign_audience(status, next_run_at)",
    "CREATE INDEX IF NOT EXISTS idx_audience_lead ON campaign_audience(lead_id)",
    r#"
    CREATE TABLE IF NOT EXISTS message_log (
        id BLOB PRIMARY KEY,
        campaign_id BLOB REFERENCES campaigns(id) ON DELETE SET NULL,
        audience_id BLOB,
        lead_id BLOB NOT NULL REFERENCES leads(id) ON DELETE CASCADE,
        step_position INTEGER,
        channel TEXT NOT NULL,
        body TEXT NOT NULL,
        status TEXT NOT NULL,
        provider_message_id TEXT,
        error TEXT,
        attempt INTEGER NOT NULL DEFAULT 1,
        created_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_message_log_audience ON message_log(audience_id, step_position)",
    "CREATE INDEX IF NOT EXISTS idx_message_log_lead ON message_log(lead_id)",
    r#"
    CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
];

const V2_WORKFLOW_TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS workflows (
        id BLOB PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        active INTEGER NOT NULL DEFAULT 0,
        trigger TEXT NOT NULL,
        nodes TEXT NOT NULL DEFAULT '[]',
        edges TEXT NOT NULL DEFAULT '[]',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS workflow_runs (
        id BLOB PRIMARY KEY,
        workflow_id BLOB NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
        lead_id BLOB REFERENCES leads(id) ON DELETE SET NULL,
        status TEXT NOT NULL,
        steps TEXT NOT NULL DEFAULT '[]',
        error TEXT,
        started_at INTEGER NOT NULL,
        finished_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_workflow_runs_workflow ON workflow_runs(workflow_id, started_at)",
];

async fn ensure_version_table(pool: &SqlitePool) -> LeadflowResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub async fn current_version(pool: &SqlitePool) -> LeadflowResult<i64> {
    let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await
        .map_err(db_err)?;
    Ok(version.unwrap_or(0))
}

async fn apply(
    pool: &SqlitePool,
    version: i64,
    name: &str,
    statements: &[&str],
) -> LeadflowResult<()> {
    let mut tx = pool.begin().await.map_err(db_err)?;
    for statement in statements {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
    }
    sqlx::query("INSERT INTO schema_version (version, name, applied_at) VALUES (?, ?, ?)")
        .bind(version)
        .bind(name)
        .bind(to_ms(chrono::Utc::now()))
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
    tx.commit().await.map_err(db_err)?;
    info!(version, name, "Applied schema migration");
    Ok(())
}

/// Bring the schema up to [`CURRENT_SCHEMA_VERSION`].
pub async fn run_migrations(pool: &SqlitePool) -> LeadflowResult<()> {
    ensure_version_table(pool).await?;
    let current = current_version(pool).await?;

    if current > CURRENT_SCHEMA_VERSION {
        return Err(LeadflowError::Database(format!(
            "database schema version {current} is newer than supported {CURRENT_SCHEMA_VERSION}"
        )));
    }
    if current == CURRENT_SCHEMA_VERSION {
        info!(version = current, "Database schema is up to date");
        return Ok(());
    }

    if current < 1 {
        apply(pool, 1, "core_tables", V1_CORE_TABLES).await?;
    }
    if current < 2 {
        apply(pool, 2, "workflow_tables", V2_WORKFLOW_TABLES).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let db = Database::in_memory().await.unwrap();
        assert_eq!(current_version(db.pool()).await.unwrap(), CURRENT_SCHEMA_VERSION);

        run_migrations(db.pool()).await.unwrap();
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(rows, CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_newer_schema_rejected() {
        let db = Database::in_memory().await.unwrap();
        sqlx::query("INSERT INTO schema_version (version, name, applied_at) VALUES (99, 'future', 0)")
            .execute(db.pool())
            .await
            .unwrap();
        let err = run_migrations(db.pool()).await.unwrap_err();
        assert!(matches!(err, LeadflowError::Database(_)));
    }
}
