//! SQLite store backend for ChainBatch.
//!
//! Persists entities and the processor watermark to a single SQLite file.
//! Every block runs in one `sqlx` transaction, so a block's writes and the
//! watermark move together or not at all.
//!
//! # Usage
//! ```rust,no_run
//! use chainbatch_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./index.db", "kusama-transfers").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory("test").await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, Sqlite, SqlitePool};
use tracing::debug;

use chainbatch_core::error::IndexerError;
use chainbatch_core::store::{Store, Transaction};

fn storage_err(e: impl std::fmt::Display) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

/// SQLite-backed store. `id` keys the watermark row, so several processors
/// can share one database file.
pub struct SqliteStore {
    pool: SqlitePool,
    id: String,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./index.db"`) or a full
    /// SQLite URL (`"sqlite:./index.db?mode=rwc"`).
    pub async fn open(path: &str, id: impl Into<String>) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };
        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        let store = Self { pool, id: id.into() };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Limited to one connection: every `:memory:` connection is its own database.
    pub async fn in_memory(id: impl Into<String>) -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;
        let store = Self { pool, id: id.into() };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS entities (
                entity     TEXT    NOT NULL,
                id         TEXT    NOT NULL,
                value      TEXT    NOT NULL,
                height     INTEGER NOT NULL,
                PRIMARY KEY (entity, id)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS status (
                id         TEXT    PRIMARY KEY,
                height     INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    /// Committed value of one entity.
    pub async fn get(&self, entity: &str, id: &str) -> Result<Option<Value>, IndexerError> {
        let row = sqlx::query("SELECT value FROM entities WHERE entity = ? AND id = ?")
            .bind(entity)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.map(|r| decode_value(r.get("value"))).transpose()
    }

    /// Number of committed rows of `entity`.
    pub async fn count(&self, entity: &str) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM entities WHERE entity = ?")
            .bind(entity)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }

    pub async fn watermark(&self) -> Result<Option<u64>, IndexerError> {
        let row = sqlx::query("SELECT height FROM status WHERE id = ?")
            .bind(&self.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.map(|r| r.get::<i64, _>("height") as u64))
    }
}

fn decode_value(raw: String) -> Result<Value, IndexerError> {
    serde_json::from_str(&raw).map_err(storage_err)
}

/// Move the watermark row to `height`, keeping the higher of the two.
async fn write_watermark(
    conn: &mut sqlx::SqliteConnection,
    id: &str,
    height: u64,
) -> Result<(), IndexerError> {
    sqlx::query(
        "INSERT INTO status (id, height, updated_at) VALUES (?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             height     = MAX(status.height, excluded.height),
             updated_at = excluded.updated_at",
    )
    .bind(id)
    .bind(height as i64)
    .bind(chrono::Utc::now().timestamp())
    .execute(conn)
    .await
    .map_err(storage_err)?;
    Ok(())
}

// ─── Store impl ──────────────────────────────────────────────────────────────

#[async_trait]
impl Store for SqliteStore {
    async fn connect(&self) -> Result<Option<u64>, IndexerError> {
        let watermark = self.watermark().await?;
        debug!(id = %self.id, ?watermark, "store connected");
        Ok(watermark)
    }

    async fn begin(&self, height: u64) -> Result<Box<dyn Transaction>, IndexerError> {
        let tx = self.pool.begin().await.map_err(storage_err)?;
        Ok(Box::new(SqliteTransaction {
            tx,
            id: self.id.clone(),
            height,
        }))
    }

    async fn advance(&self, height: u64) -> Result<(), IndexerError> {
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        write_watermark(&mut conn, &self.id, height).await?;
        debug!(id = %self.id, height, "watermark advanced");
        Ok(())
    }
}

/// One block's writes inside an open `sqlx` transaction.
///
/// Dropping it without committing rolls the transaction back.
pub struct SqliteTransaction {
    tx: sqlx::Transaction<'static, Sqlite>,
    id: String,
    height: u64,
}

#[async_trait]
impl Transaction for SqliteTransaction {
    fn height(&self) -> u64 {
        self.height
    }

    async fn get(&mut self, entity: &str, id: &str) -> Result<Option<Value>, IndexerError> {
        let row = sqlx::query("SELECT value FROM entities WHERE entity = ? AND id = ?")
            .bind(entity)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(storage_err)?;
        row.map(|r| decode_value(r.get("value"))).transpose()
    }

    async fn upsert(&mut self, entity: &str, id: &str, value: Value) -> Result<(), IndexerError> {
        let raw = serde_json::to_string(&value).map_err(storage_err)?;
        sqlx::query(
            "INSERT OR REPLACE INTO entities (entity, id, value, height)
             VALUES (?, ?, ?, ?)",
        )
        .bind(entity)
        .bind(id)
        .bind(&raw)
        .bind(self.height as i64)
        .execute(&mut *self.tx)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn remove(&mut self, entity: &str, id: &str) -> Result<(), IndexerError> {
        sqlx::query("DELETE FROM entities WHERE entity = ? AND id = ?")
            .bind(entity)
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), IndexerError> {
        let current = sqlx::query("SELECT height FROM status WHERE id = ?")
            .bind(&self.id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(storage_err)?
            .map(|r| r.get::<i64, _>("height") as u64);
        if let Some(watermark) = current {
            if self.height <= watermark {
                return Err(IndexerError::Invariant(format!(
                    "commit at height {} does not advance watermark {watermark}",
                    self.height
                )));
            }
        }
        write_watermark(&mut *self.tx, &self.id, self.height).await?;
        let SqliteTransaction { tx, height, .. } = *self;
        tx.commit().await.map_err(storage_err)?;
        debug!(height, "block committed");
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
