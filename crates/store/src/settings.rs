use chrono::Utc;
use leadflow_core::LeadflowResult;
use sqlx::SqlitePool;

use crate::db::{db_err, to_ms};

/// Settings key of the global outbound kill switch.
pub const KILL_SWITCH_KEY: &str = "outbound_kill_switch";

/// Small key/value table for runtime flags shared by every node.
#[derive(Debug, Clone)]
pub struct Settings {
    pool: SqlitePool,
}

impl Settings {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, key: &str) -> LeadflowResult<Option<String>> {
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    pub async fn set(&self, key: &str, value: &str) -> LeadflowResult<()> {
        sqlx::query(
            "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(to_ms(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn kill_switch_engaged(&self) -> LeadflowResult<bool> {
        Ok(self.get(KILL_SWITCH_KEY).await?.as_deref() == Some("true"))
    }

    pub async fn set_kill_switch(&self, engaged: bool) -> LeadflowResult<()> {
        self.set(KILL_SWITCH_KEY, if engaged { "true" } else { "false" })
            .await
    }
}
