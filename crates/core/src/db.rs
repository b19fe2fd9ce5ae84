//! SQLite connection pool and schema migrations.

use crate::config::CoreConfig;
use crate::{LabError, LabResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const MIGRATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to the lab database, cheap to clone and share between services.
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the pool described by `cfg` and brings the schema up to date.
    pub async fn connect(cfg: &CoreConfig) -> LabResult<Self> {
        Self::open(cfg.database_url(), cfg.max_connections()).await
    }

    pub async fn open(database_url: &str, max_connections: u32) -> LabResult<Self> {
        tracing::info!("initialising lab database");

        let file_part = database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");
        let file_part = file_part.split('?').next().unwrap_or_default();
        if file_part != ":memory:" {
            if let Some(parent) = Path::new(file_part).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    tracing::debug!("creating database directory: {:?}", parent);
                    std::fs::create_dir_all(parent).map_err(LabError::DatabaseDirCreation)?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(60))
            .connect_with(options)
            .await?;

        tracing::info!("running database migrations");
        match tokio::time::timeout(MIGRATION_TIMEOUT, sqlx::migrate!("./migrations").run(&pool))
            .await
        {
            Ok(Ok(())) => tracing::info!("database migrations complete"),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(LabError::MigrationTimeout),
        }

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
