//! Connection pool setup and small helpers shared by the repositories.

use chrono::{DateTime, TimeZone, Utc};
use leadflow_core::config::DatabaseConfig;
use leadflow_core::{LeadflowError, LeadflowResult};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::migrations;

/// Owns the SQLite pool. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database named by `config.url`, apply
    /// pragmas and run pending migrations.
    pub async fn connect(config: &DatabaseConfig) -> LeadflowResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(db_err)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        info!(url = %config.url, max_connections = config.max_connections, "Database opened");

        migrations::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Private in-memory database. Limited to one connection because every
    /// `:memory:` connection is a separate database.
    pub async fn in_memory() -> LeadflowResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(db_err)?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        migrations::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cheap liveness probe used by the readiness endpoint.
    pub async fn ping(&self) -> LeadflowResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

pub(crate) fn db_err(e: sqlx::Error) -> LeadflowError {
    LeadflowError::Database(e.to_string())
}

/// Timestamps are stored as epoch milliseconds so due-time comparisons are
/// plain integer comparisons.
pub(crate) fn to_ms(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

pub(crate) fn opt_from_ms(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.map(from_ms)
}

pub(crate) fn parse_text<T: FromStr<Err = String>>(column: &str, value: &str) -> LeadflowResult<T> {
    value
        .parse()
        .map_err(|e: String| LeadflowError::Database(format!("column {column}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_ping() {
        let db = Database::in_memory().await.unwrap();
        db.ping().await.unwrap();
    }

    #[test]
    fn test_ms_round_trip_truncates_to_millis() {
        let now = Utc::now();
        let back = from_ms(to_ms(now));
        assert_eq!(back.timestamp_millis(), now.timestamp_millis());
    }
}
