use super::{
    DownloadStore, RecordKind, RecordStream, ScanFilter, StoredRecord,
    common::{apply_download, canonical_blob, contention_backoff, decode_entries},
};
use crate::error::StoreError;
use crate::migrations::{Migrator, store::PostgresStoreMigrator};
use crate::quota::DownloadLogEntry;
use async_stream::stream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use sqlx::{
    PgPool, Postgres, QueryBuilder, Row,
    postgres::{PgPoolOptions, PgRow},
};

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to a PostgreSQL download store and bring its schema up to
    /// date.
    ///
    /// # Errors
    ///
    /// Returns an error if the URI is invalid, the connection fails or a
    /// migration fails.
    #[tracing::instrument(skip_all)]
    pub async fn new(uri: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(uri)
            .await?;

        PostgresStoreMigrator::new(pool.clone())
            .migrate_to_latest()
            .await
            .map_err(StoreError::Database)?;

        Ok(Self { pool })
    }

    async fn read_blob(
        &self,
        identity_id: i64,
        kind: RecordKind,
    ) -> Result<Vec<DownloadLogEntry>, StoreError> {
        let blob: Option<String> =
            sqlx::query_scalar("SELECT blob FROM download_records WHERE identity_id = $1 AND kind = $2")
                .bind(identity_id)
                .bind(kind.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(blob
            .map(|b| decode_entries(identity_id, kind, &b))
            .transpose()?
            .unwrap_or_default())
    }

    /// One optimistic read-modify-write. Returns `false` when another writer
    /// changed the log first.
    async fn try_append(
        &self,
        identity_id: i64,
        file: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let log_row = sqlx::query(
            "SELECT blob, version FROM download_records WHERE identity_id = $1 AND kind = 'log'",
        )
        .bind(identity_id)
        .fetch_optional(&mut *tx)
        .await?;
        let archive_blob: Option<String> = sqlx::query_scalar(
            "SELECT blob FROM download_records WHERE identity_id = $1 AND kind = 'archive'",
        )
        .bind(identity_id)
        .fetch_optional(&mut *tx)
        .await?;

        let (log_blob, version) = match log_row {
            Some(row) => (
                Some(row.try_get::<String, _>("blob")?),
                Some(row.try_get::<i64, _>("version")?),
            ),
            None => (None, None),
        };

        let (new_log, new_archive) = apply_download(
            identity_id,
            log_blob.as_deref(),
            archive_blob.as_deref(),
            file,
            now,
        )?;
        let updated_at = now.timestamp();

        let written = match version {
            Some(version) => sqlx::query(
                "UPDATE download_records SET blob = $1, version = version + 1, updated_at = $2 \
                 WHERE identity_id = $3 AND kind = 'log' AND version = $4",
            )
            .bind(&new_log)
            .bind(updated_at)
            .bind(identity_id)
            .bind(version)
            .execute(&mut *tx)
            .await?
            .rows_affected(),
            None => sqlx::query(
                "INSERT INTO download_records (identity_id, kind, blob, version, updated_at) \
                 VALUES ($1, 'log', $2, 0, $3) ON CONFLICT(identity_id, kind) DO NOTHING",
            )
            .bind(identity_id)
            .bind(&new_log)
            .bind(updated_at)
            .execute(&mut *tx)
            .await?
            .rows_affected(),
        };

        if written == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        if let Some(new_archive) = new_archive {
            sqlx::query(
                "INSERT INTO download_records (identity_id, kind, blob, version, updated_at) \
                 VALUES ($1, 'archive', $2, 0, $3) \
                 ON CONFLICT(identity_id, kind) DO UPDATE SET blob = excluded.blob, \
                 version = download_records.version + 1, updated_at = excluded.updated_at",
            )
            .bind(identity_id)
            .bind(&new_archive)
            .bind(updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }
}

/// serialization_failure and deadlock_detected: another writer got there
/// first.
fn is_busy(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("40001" | "40P01")),
        _ => false,
    }
}

fn record_from_row(row: &PgRow) -> Result<StoredRecord, StoreError> {
    let kind: String = row.try_get("kind")?;
    Ok(StoredRecord {
        identity_id: row.try_get("identity_id")?,
        kind: kind.parse()?,
        blob: row.try_get("blob")?,
    })
}

#[async_trait]
impl DownloadStore for PostgresStore {
    #[tracing::instrument(skip_all, fields(identity_id = identity_id))]
    async fn get_log(&self, identity_id: i64) -> Result<Vec<DownloadLogEntry>, StoreError> {
        self.read_blob(identity_id, RecordKind::Log).await
    }

    #[tracing::instrument(skip_all, fields(identity_id = identity_id))]
    async fn get_archive(&self, identity_id: i64) -> Result<Vec<DownloadLogEntry>, StoreError> {
        self.read_blob(identity_id, RecordKind::Archive).await
    }

    #[tracing::instrument(skip_all, fields(identity_id = identity_id, file = file))]
    async fn append_log_entry(
        &self,
        identity_id: i64,
        file: &str,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<(), StoreError> {
        let attempts = max_attempts.max(1);
        for attempt in 0..attempts {
            match self.try_append(identity_id, file, now).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(StoreError::Database(e))
                    if e.downcast_ref::<sqlx::Error>().is_some_and(is_busy) => {}
                Err(e) => return Err(e),
            }
            tracing::debug!(identity_id, attempt, "Download log changed during append, retrying");
            contention_backoff(attempt).await;
        }
        Err(StoreError::Contention {
            identity_id,
            attempts,
        })
    }

    #[tracing::instrument(skip_all, fields(identity_id = identity_id, kind = %kind))]
    async fn put_blob(
        &self,
        identity_id: i64,
        kind: RecordKind,
        blob: &str,
    ) -> Result<(), StoreError> {
        let canonical = canonical_blob(blob);
        sqlx::query(
            "INSERT INTO download_records (identity_id, kind, blob, version, updated_at) \
             VALUES ($1, $2, $3, 0, $4) \
             ON CONFLICT(identity_id, kind) DO UPDATE SET blob = excluded.blob, \
             version = download_records.version + 1, updated_at = excluded.updated_at",
        )
        .bind(identity_id)
        .bind(kind.as_str())
        .bind(canonical.as_ref())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    fn scan(&self, filter: ScanFilter) -> RecordStream<'_> {
        let pool = self.pool.clone();
        Box::pin(stream! {
            let mut qb = QueryBuilder::<Postgres>::new(
                "SELECT identity_id, kind, blob FROM download_records WHERE blob LIKE ",
            );
            qb.push_bind(filter.like_pattern());
            qb.push(" ESCAPE '\\'");
            if let Some(identity_id) = filter.identity_id {
                qb.push(" AND identity_id = ").push_bind(identity_id);
            }
            if !filter.include_archive {
                qb.push(" AND kind = 'log'");
            }
            qb.push(" ORDER BY identity_id, kind");

            let mut rows = qb.build().fetch(&pool);
            while let Some(row) = rows.next().await {
                match row {
                    Ok(r) => yield record_from_row(&r),
                    Err(e) => yield Err(StoreError::from(e)),
                }
            }
        })
    }
}
