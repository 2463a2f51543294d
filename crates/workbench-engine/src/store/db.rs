//! Database setup and schema management

use anyhow::{Context, Result};
use directories::ProjectDirs;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::StoreConfig;

/// Handle to the record store. Cheap to clone; wraps a connection pool.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

/// Get the default record database path
fn default_db_path() -> Result<PathBuf> {
    let proj_dirs =
        ProjectDirs::from("", "", "workbench").context("Failed to get project directories")?;

    let state_dir = proj_dirs.data_local_dir();
    fs::create_dir_all(state_dir).context("Failed to create state directory")?;

    Ok(state_dir.join("records.db"))
}

impl Store {
    /// Open the record store, creating the database and schema if needed.
    pub async fn open(config: &StoreConfig) -> Result<Self> {
        let path = match &config.db_path {
            Some(p) => p.clone(),
            None => default_db_path()?,
        };
        let db_url = format!("sqlite://{}?mode=rwc", path.display());

        let options = SqliteConnectOptions::from_str(&db_url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to open record store")?;

        setup_schema(&pool).await?;

        Ok(Self { pool })
    }

    /// Open an in-memory store with the schema applied. Each call returns an
    /// isolated database.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to open in-memory record store")?;

        setup_schema(&pool).await?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool (test databases), applying the schema.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        setup_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub(super) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Setup database schema
async fn setup_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS environments (
            environment_id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            env_type TEXT NOT NULL,
            account_id TEXT NOT NULL,
            status TEXT NOT NULL,
            status_version INTEGER NOT NULL DEFAULT 0,
            last_event_at INTEGER,
            instance_id TEXT,
            failure_reason TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            account_id TEXT PRIMARY KEY,
            role_arn TEXT NOT NULL,
            external_id TEXT,
            status TEXT NOT NULL,
            failure_reason TEXT,
            reconciled_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Events resolve their target environment by backend instance id.
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_environments_instance
         ON environments(instance_id) WHERE instance_id IS NOT NULL",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_environments_project ON environments(project_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_environments_account ON environments(account_id)")
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_store_has_schema() {
        let store = Store::open_in_memory().await.unwrap();

        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table'
             AND name IN ('environments', 'accounts')",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(tables, 2);
    }

    #[tokio::test]
    async fn schema_setup_is_idempotent() {
        let store = Store::open_in_memory().await.unwrap();
        setup_schema(store.pool()).await.unwrap();
        setup_schema(store.pool()).await.unwrap();
    }
}
