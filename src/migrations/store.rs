use super::{Migration, Migrator};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::error::Error;

const CREATE_VERSION_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
)";

/// One row per identity and record kind ('log' or 'archive'). `blob` is a
/// JSON array of entries; `version` backs optimistic updates.
const DOWNLOAD_RECORDS_TABLE_SQLITE: &str = "CREATE TABLE IF NOT EXISTS download_records (
    identity_id INTEGER NOT NULL,
    kind TEXT NOT NULL,
    blob TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY(identity_id, kind)
)";

#[cfg(feature = "postgres")]
const DOWNLOAD_RECORDS_TABLE_POSTGRES: &str = "CREATE TABLE IF NOT EXISTS download_records (
    identity_id BIGINT NOT NULL,
    kind TEXT NOT NULL,
    blob TEXT NOT NULL,
    version BIGINT NOT NULL DEFAULT 0,
    updated_at BIGINT NOT NULL,
    PRIMARY KEY(identity_id, kind)
)";

const KIND_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS download_records_kind_idx ON download_records(kind, identity_id)";

/// SQLite migration to version 1: the download_records table.
pub struct SqliteStoreMigration001 {
    pool: SqlitePool,
}

#[async_trait]
impl Migration for SqliteStoreMigration001 {
    fn target_version(&self) -> u32 {
        1
    }

    fn description(&self) -> &str {
        "Create download_records table"
    }

    async fn apply(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        sqlx::query(DOWNLOAD_RECORDS_TABLE_SQLITE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// SQLite migration to version 2: index for log-only scans.
pub struct SqliteStoreMigration002 {
    pool: SqlitePool,
}

#[async_trait]
impl Migration for SqliteStoreMigration002 {
    fn target_version(&self) -> u32 {
        2
    }

    fn description(&self) -> &str {
        "Index download_records by kind"
    }

    async fn apply(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        sqlx::query(KIND_INDEX).execute(&self.pool).await?;
        Ok(())
    }
}

pub struct SqliteStoreMigrator {
    pool: SqlitePool,
}

impl SqliteStoreMigrator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Migrator for SqliteStoreMigrator {
    async fn get_current_version(&self) -> Result<u32, Box<dyn Error + Send + Sync>> {
        sqlx::query(CREATE_VERSION_TABLE).execute(&self.pool).await?;

        let row = sqlx::query("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let version: i64 = row.try_get("version")?;
                Ok(u32::try_from(version)?)
            }
            None => Ok(0),
        }
    }

    async fn set_version(&self, version: u32) -> Result<(), Box<dyn Error + Send + Sync>> {
        sqlx::query("DELETE FROM schema_version")
            .execute(&self.pool)
            .await?;
        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(i64::from(version))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn get_migrations(&self) -> Vec<Box<dyn Migration>> {
        vec![
            Box::new(SqliteStoreMigration001 {
                pool: self.pool.clone(),
            }),
            Box::new(SqliteStoreMigration002 {
                pool: self.pool.clone(),
            }),
        ]
    }
}

/// PostgreSQL migration to version 1: the download_records table.
#[cfg(feature = "postgres")]
pub struct PostgresStoreMigration001 {
    pool: sqlx::PgPool,
}

#[cfg(feature = "postgres")]
#[async_trait]
impl Migration for PostgresStoreMigration001 {
    fn target_version(&self) -> u32 {
        1
    }

    fn description(&self) -> &str {
        "Create download_records table"
    }

    async fn apply(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        sqlx::query(DOWNLOAD_RECORDS_TABLE_POSTGRES)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// PostgreSQL migration to version 2: index for log-only scans.
#[cfg(feature = "postgres")]
pub struct PostgresStoreMigration002 {
    pool: sqlx::PgPool,
}

#[cfg(feature = "postgres")]
#[async_trait]
impl Migration for PostgresStoreMigration002 {
    fn target_version(&self) -> u32 {
        2
    }

    fn description(&self) -> &str {
        "Index download_records by kind"
    }

    async fn apply(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        sqlx::query(KIND_INDEX).execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(feature = "postgres")]
pub struct PostgresStoreMigrator {
    pool: sqlx::PgPool,
}

#[cfg(feature = "postgres")]
impl PostgresStoreMigrator {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[cfg(feature = "postgres")]
#[async_trait]
impl Migrator for PostgresStoreMigrator {
    async fn get_current_version(&self) -> Result<u32, Box<dyn Error + Send + Sync>> {
        sqlx::query(CREATE_VERSION_TABLE).execute(&self.pool).await?;

        let row = sqlx::query("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let version: i32 = row.try_get("version")?;
                Ok(u32::try_from(version)?)
            }
            None => Ok(0),
        }
    }

    async fn set_version(&self, version: u32) -> Result<(), Box<dyn Error + Send + Sync>> {
        sqlx::query("DELETE FROM schema_version")
            .execute(&self.pool)
            .await?;
        sqlx::query("INSERT INTO schema_version (version) VALUES ($1)")
            .bind(i32::try_from(version)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn get_migrations(&self) -> Vec<Box<dyn Migration>> {
        vec![
            Box::new(PostgresStoreMigration001 {
                pool: self.pool.clone(),
            }),
            Box::new(PostgresStoreMigration002 {
                pool: self.pool.clone(),
            }),
        ]
    }
}
