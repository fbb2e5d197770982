use crate::application::ports::storage_engine::{BatchOp, StorageEngine};
use crate::domain::entities::{CollectionFootprint, RecordDraft, StorageFootprint, StoredRecord};
use crate::domain::value_objects::SyncState;
use crate::shared::config::DatabaseConfig;
use crate::shared::error::{CacheError, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Row, Sqlite};
use std::collections::HashSet;
use std::str::FromStr;
use tracing::{info, warn};
use uuid::Uuid;

const SCHEMA_VERSION: i32 = 2;

/// SQLite-backed storage engine. One `records` table keyed by
/// `(collection, id)`, with index lookups over the integer sync-state code.
pub struct SqliteStorageEngine {
    pool: Pool<Sqlite>,
    collections: HashSet<String>,
}

#[derive(Debug, Clone, FromRow)]
struct RecordRow {
    id: String,
    logical_type: String,
    payload: String,
    cached_at: i64,
    sync_state: i64,
}

impl SqliteStorageEngine {
    pub async fn open(config: &DatabaseConfig, collections: &[String]) -> Result<Self> {
        Self::prepare_parent_dir(&config.url)?;

        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| CacheError::StorageUnavailable(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| CacheError::StorageUnavailable(e.to_string()))?;

        info!(url = %config.url, "offline store connected");

        let engine = Self {
            pool,
            collections: collections.iter().cloned().collect(),
        };
        engine.initialize_schema().await?;
        Ok(engine)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// SQLite creates a missing database file but not missing directories.
    fn prepare_parent_dir(url: &str) -> Result<()> {
        let path = url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");
        if path.is_empty() || path.contains(":memory:") {
            return Ok(());
        }
        let path = path.split('?').next().unwrap_or(path);
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| CacheError::StorageUnavailable(e.to_string()))?;
            }
        }
        Ok(())
    }

    fn ensure_collection(&self, collection: &str) -> Result<()> {
        if self.collections.contains(collection) {
            Ok(())
        } else {
            Err(CacheError::UnknownCollection(collection.to_string()))
        }
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                logical_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                cached_at INTEGER NOT NULL,
                sync_state INTEGER NOT NULL DEFAULT 1,
                PRIMARY KEY (collection, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Databases written by the pre-rewrite schema carry a boolean
        // `synced` column; the index below requires the integer code.
        self.convert_legacy_sync_flags().await;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_records_sync_state ON records (collection, sync_state)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_records_logical_type ON records (collection, logical_type)",
        )
        .execute(&self.pool)
        .await?;

        if self.user_version().await? < SCHEMA_VERSION {
            sqlx::query(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    async fn user_version(&self) -> Result<i32> {
        let version: i32 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await?;
        Ok(version)
    }

    /// One-time best-effort conversion of the legacy boolean `synced` flag
    /// into the enumerated `sync_state` code. Per-record failures are
    /// logged and skipped, never fatal.
    async fn convert_legacy_sync_flags(&self) {
        let version = match self.user_version().await {
            Ok(v) => v,
            Err(err) => {
                warn!(target: "offline::store", error = %err, "could not read schema version");
                return;
            }
        };
        if version >= SCHEMA_VERSION {
            return;
        }

        let columns = match self.table_columns("records").await {
            Ok(columns) => columns,
            Err(err) => {
                warn!(target: "offline::store", error = %err, "could not inspect records table");
                return;
            }
        };
        if !columns.iter().any(|c| c == "synced") {
            return;
        }

        if !columns.iter().any(|c| c == "sync_state") {
            if let Err(err) =
                sqlx::query("ALTER TABLE records ADD COLUMN sync_state INTEGER NOT NULL DEFAULT 1")
                    .execute(&self.pool)
                    .await
            {
                warn!(target: "offline::store", error = %err, "could not add sync_state column");
                return;
            }
        }

        let rows = match sqlx::query("SELECT collection, id, synced FROM records")
            .fetch_all(&self.pool)
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                warn!(target: "offline::store", error = %err, "could not scan legacy sync flags");
                return;
            }
        };

        let mut converted = 0u32;
        for row in rows {
            let collection: String = row.try_get("collection").unwrap_or_default();
            let id: String = row.try_get("id").unwrap_or_default();
            let synced: i64 = row.try_get("synced").unwrap_or(0);
            let state = if synced != 0 {
                SyncState::Synced
            } else {
                SyncState::Pending
            };

            let result = sqlx::query(
                "UPDATE records SET sync_state = ?1 WHERE collection = ?2 AND id = ?3",
            )
            .bind(state.code())
            .bind(&collection)
            .bind(&id)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => converted += 1,
                Err(err) => {
                    warn!(
                        target: "offline::store",
                        collection,
                        id,
                        error = %err,
                        "skipping record during sync flag conversion"
                    );
                }
            }
        }

        if let Err(err) = sqlx::query("ALTER TABLE records DROP COLUMN synced")
            .execute(&self.pool)
            .await
        {
            warn!(target: "offline::store", error = %err, "could not drop legacy synced column");
        }

        info!(target: "offline::store", converted, "legacy sync flags converted");
    }

    async fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
            .fetch_all(&self.pool)
            .await?;
        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            columns.push(row.try_get::<String, _>("name")?);
        }
        Ok(columns)
    }

    fn into_record(row: RecordRow) -> Result<StoredRecord> {
        let payload = serde_json::from_str(&row.payload)?;
        let sync_state =
            SyncState::from_code(row.sync_state as i32).map_err(CacheError::StorageIo)?;
        let cached_at = Utc
            .timestamp_millis_opt(row.cached_at)
            .single()
            .ok_or_else(|| {
                CacheError::StorageIo(format!("invalid cached_at timestamp: {}", row.cached_at))
            })?;
        Ok(StoredRecord {
            id: row.id,
            logical_type: row.logical_type,
            payload,
            cached_at,
            sync_state,
        })
    }
}

const UPSERT_SQL: &str = r#"
    INSERT INTO records (collection, id, logical_type, payload, cached_at, sync_state)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    ON CONFLICT(collection, id) DO UPDATE SET
        logical_type = excluded.logical_type,
        payload = excluded.payload,
        cached_at = excluded.cached_at,
        sync_state = excluded.sync_state
"#;

#[async_trait]
impl StorageEngine for SqliteStorageEngine {
    async fn put(&self, collection: &str, draft: RecordDraft) -> Result<String> {
        self.ensure_collection(collection)?;
        let id = draft.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let payload = serde_json::to_string(&draft.payload)?;

        sqlx::query(UPSERT_SQL)
            .bind(collection)
            .bind(&id)
            .bind(&draft.logical_type)
            .bind(&payload)
            .bind(Utc::now().timestamp_millis())
            .bind(draft.sync_state.code())
            .execute(&self.pool)
            .await?;

        Ok(id)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredRecord>> {
        self.ensure_collection(collection)?;
        let row = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT id, logical_type, payload, cached_at, sync_state
            FROM records
            WHERE collection = ?1 AND id = ?2
            "#,
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::into_record).transpose()
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<StoredRecord>> {
        self.ensure_collection(collection)?;
        let rows = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT id, logical_type, payload, cached_at, sync_state
            FROM records
            WHERE collection = ?1
            "#,
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::into_record).collect()
    }

    async fn get_by_sync_state(
        &self,
        collection: &str,
        state: SyncState,
    ) -> Result<Vec<StoredRecord>> {
        self.ensure_collection(collection)?;
        let rows = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT id, logical_type, payload, cached_at, sync_state
            FROM records
            WHERE collection = ?1 AND sync_state = ?2
            "#,
        )
        .bind(collection)
        .bind(state.code())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::into_record).collect()
    }

    async fn set_sync_state(&self, collection: &str, id: &str, state: SyncState) -> Result<()> {
        self.ensure_collection(collection)?;
        let result =
            sqlx::query("UPDATE records SET sync_state = ?1 WHERE collection = ?2 AND id = ?3")
                .bind(state.code())
                .bind(collection)
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(CacheError::NotFound(format!("{collection}/{id}")));
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        self.ensure_collection(collection)?;
        let result = sqlx::query("DELETE FROM records WHERE collection = ?1 AND id = ?2")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CacheError::NotFound(format!("{collection}/{id}")));
        }
        Ok(())
    }

    async fn clear(&self, collection: &str) -> Result<()> {
        self.ensure_collection(collection)?;
        sqlx::query("DELETE FROM records WHERE collection = ?1")
            .bind(collection)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        for op in &ops {
            self.ensure_collection(op.collection())?;
        }

        let mut tx = self.pool.begin().await?;
        for op in ops {
            match op {
                BatchOp::Put { collection, draft } => {
                    let id = draft.id.unwrap_or_else(|| Uuid::new_v4().to_string());
                    let payload = serde_json::to_string(&draft.payload)?;
                    sqlx::query(UPSERT_SQL)
                        .bind(&collection)
                        .bind(&id)
                        .bind(&draft.logical_type)
                        .bind(&payload)
                        .bind(Utc::now().timestamp_millis())
                        .bind(draft.sync_state.code())
                        .execute(&mut *tx)
                        .await?;
                }
                BatchOp::Delete { collection, id } => {
                    sqlx::query("DELETE FROM records WHERE collection = ?1 AND id = ?2")
                        .bind(&collection)
                        .bind(&id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn storage_footprint(&self) -> Result<StorageFootprint> {
        let rows = sqlx::query(
            r#"
            SELECT collection,
                   COUNT(*) AS record_count,
                   COALESCE(SUM(LENGTH(payload)), 0) AS approx_bytes
            FROM records
            GROUP BY collection
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut per_collection: Vec<CollectionFootprint> = Vec::new();
        for row in rows {
            per_collection.push(CollectionFootprint {
                collection: row.try_get("collection")?,
                record_count: row.try_get::<i64, _>("record_count")? as u64,
                approx_bytes: row.try_get::<i64, _>("approx_bytes")? as u64,
            });
        }

        for name in &self.collections {
            if !per_collection.iter().any(|c| &c.collection == name) {
                per_collection.push(CollectionFootprint {
                    collection: name.clone(),
                    record_count: 0,
                    approx_bytes: 0,
                });
            }
        }
        per_collection.sort_by(|a, b| a.collection.cmp(&b.collection));

        let total_bytes = per_collection.iter().map(|c| c.approx_bytes).sum();
        Ok(StorageFootprint {
            per_collection,
            total_bytes,
        })
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
