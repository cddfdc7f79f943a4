//! SQLite storage backend.
//!
//! One file holds the three event tables and the watermark row. Uses `sqlx`
//! with WAL mode so the read API can query while the indexer writes.
//!
//! # Usage
//! ```rust,no_run
//! use vaultindex_storage::sqlite::SqliteEventStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteEventStore::open("./vault.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteEventStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use vaultindex_core::{
    EventKind, EventStore, IndexerError, IndexerStatus, RecordBatch, RedeemRequested, U256,
};

fn storage(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

/// SQLite-backed event store.
pub struct SqliteEventStore {
    pool: SqlitePool,
}

impl SqliteEventStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./vault.db"`) or a full
    /// SQLite URL (`"sqlite:./vault.db"`). A missing file is created.
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}")
        };

        // WAL mode: readers don't block the indexer
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(storage)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(storage)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Every pooled connection would get its own empty database, so the pool
    /// is pinned to a single connection that never idles out.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(storage)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), IndexerError> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS redeem_requested (
                redeem_id        TEXT    PRIMARY KEY,
                owner            TEXT    NOT NULL,
                receiver         TEXT    NOT NULL,
                shares           TEXT    NOT NULL,
                assets           TEXT    NOT NULL,
                epoch            TEXT    NOT NULL,
                block_number     INTEGER NOT NULL,
                timestamp        INTEGER NOT NULL,
                transaction_hash TEXT    NOT NULL,
                event_index      INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS redeem_claimed (
                redeem_id              TEXT    PRIMARY KEY,
                receiver               TEXT    NOT NULL,
                redeem_request_nominal TEXT    NOT NULL,
                assets                 TEXT    NOT NULL,
                epoch                  TEXT    NOT NULL,
                block_number           INTEGER NOT NULL,
                timestamp              INTEGER NOT NULL,
                transaction_hash       TEXT    NOT NULL,
                event_index            INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS report (
                block_number           INTEGER NOT NULL,
                event_index            INTEGER NOT NULL,
                new_epoch              TEXT    NOT NULL,
                new_handled_epoch_len  TEXT    NOT NULL,
                total_supply           TEXT    NOT NULL,
                total_assets           TEXT    NOT NULL,
                management_fee_shares  TEXT    NOT NULL,
                performance_fee_shares TEXT    NOT NULL,
                timestamp              INTEGER NOT NULL,
                transaction_hash       TEXT    NOT NULL,
                PRIMARY KEY (block_number, event_index)
            );",
            "CREATE TABLE IF NOT EXISTS indexer_status (
                id         INTEGER PRIMARY KEY CHECK (id = 1),
                last_block INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );",
            "CREATE INDEX IF NOT EXISTS idx_redeem_requested_block ON redeem_requested (block_number);",
            "CREATE INDEX IF NOT EXISTS idx_redeem_claimed_block ON redeem_claimed (block_number);",
        ];
        for sql in statements {
            sqlx::query(sql).execute(&self.pool).await.map_err(storage)?;
        }
        Ok(())
    }

    /// Number of stored rows for `kind`.
    pub async fn count(&self, kind: EventKind) -> Result<u64, IndexerError> {
        let sql = format!("SELECT COUNT(*) AS cnt FROM {}", kind.table_name());
        let row = sqlx::query(&sql).fetch_one(&self.pool).await.map_err(storage)?;
        Ok(row.get::<i64, _>("cnt") as u64)
    }

    /// Look up a redemption request by id.
    pub async fn redeem_request(
        &self,
        redeem_id: U256,
    ) -> Result<Option<RedeemRequested>, IndexerError> {
        let row = sqlx::query(
            "SELECT redeem_id, owner, receiver, shares, assets, epoch,
                    block_number, timestamp, transaction_hash, event_index
             FROM redeem_requested WHERE redeem_id = ?",
        )
        .bind(redeem_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.map(|r| {
            Ok(RedeemRequested {
                owner: r.get("owner"),
                receiver: r.get("receiver"),
                shares: parse_u256(r.get("shares"))?,
                assets: parse_u256(r.get("assets"))?,
                redeem_id: parse_u256(r.get("redeem_id"))?,
                epoch: parse_u256(r.get("epoch"))?,
                meta: vaultindex_core::EventMeta {
                    block_number: r.get::<i64, _>("block_number") as u64,
                    timestamp: r.get("timestamp"),
                    transaction_hash: r.get("transaction_hash"),
                    event_index: r.get::<i64, _>("event_index") as u32,
                },
            })
        })
        .transpose()
    }
}

fn parse_u256(text: String) -> Result<U256, IndexerError> {
    U256::from_str_radix(&text, 10)
        .map_err(|e| IndexerError::Storage(format!("stored value {text:?} is not a u256: {e}")))
}

// ─── EventStore impl ─────────────────────────────────────────────────────────

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn last_block(&self, kind: EventKind) -> Result<Option<u64>, IndexerError> {
        let sql = format!("SELECT MAX(block_number) AS max_block FROM {}", kind.table_name());
        let row = sqlx::query(&sql).fetch_one(&self.pool).await.map_err(storage)?;
        Ok(row.get::<Option<i64>, _>("max_block").map(|b| b as u64))
    }

    async fn indexer_status(&self) -> Result<Option<IndexerStatus>, IndexerError> {
        let row = sqlx::query("SELECT last_block, updated_at FROM indexer_status WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        Ok(row.map(|r| IndexerStatus {
            last_block: r.get::<i64, _>("last_block") as u64,
            updated_at: r.get("updated_at"),
        }))
    }

    async fn update_indexer_status(&self, block_number: u64) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT INTO indexer_status (id, last_block, updated_at) VALUES (1, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                last_block = MAX(indexer_status.last_block, excluded.last_block),
                updated_at = excluded.updated_at",
        )
        .bind(block_number as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        debug!(block = block_number, "indexer status updated");
        Ok(())
    }

    async fn bulk_insert(&self, batch: RecordBatch<'_>) -> Result<u64, IndexerError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(storage)?;
        let mut inserted = 0u64;

        match batch {
            RecordBatch::RedeemRequested(rows) => {
                for r in rows {
                    let result = sqlx::query(
                        "INSERT OR IGNORE INTO redeem_requested
                            (redeem_id, owner, receiver, shares, assets, epoch,
                             block_number, timestamp, transaction_hash, event_index)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(r.redeem_id.to_string())
                    .bind(&r.owner)
                    .bind(&r.receiver)
                    .bind(r.shares.to_string())
                    .bind(r.assets.to_string())
                    .bind(r.epoch.to_string())
                    .bind(r.meta.block_number as i64)
                    .bind(r.meta.timestamp)
                    .bind(&r.meta.transaction_hash)
                    .bind(i64::from(r.meta.event_index))
                    .execute(&mut *tx)
                    .await
                    .map_err(storage)?;
                    inserted += result.rows_affected();
                }
            }
            RecordBatch::RedeemClaimed(rows) => {
                for r in rows {
                    let result = sqlx::query(
                        "INSERT OR IGNORE INTO redeem_claimed
                            (redeem_id, receiver, redeem_request_nominal, assets, epoch,
                             block_number, timestamp, transaction_hash, event_index)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(r.redeem_id.to_string())
                    .bind(&r.receiver)
                    .bind(r.redeem_request_nominal.to_string())
                    .bind(r.assets.to_string())
                    .bind(r.epoch.to_string())
                    .bind(r.meta.block_number as i64)
                    .bind(r.meta.timestamp)
                    .bind(&r.meta.transaction_hash)
                    .bind(i64::from(r.meta.event_index))
                    .execute(&mut *tx)
                    .await
                    .map_err(storage)?;
                    inserted += result.rows_affected();
                }
            }
            RecordBatch::Report(rows) => {
                for r in rows {
                    let result = sqlx::query(
                        "INSERT OR IGNORE INTO report
                            (block_number, event_index, new_epoch, new_handled_epoch_len,
                             total_supply, total_assets, management_fee_shares,
                             performance_fee_shares, timestamp, transaction_hash)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(r.meta.block_number as i64)
                    .bind(i64::from(r.meta.event_index))
                    .bind(r.new_epoch.to_string())
                    .bind(r.new_handled_epoch_len.to_string())
                    .bind(r.total_supply.to_string())
                    .bind(r.total_assets.to_string())
                    .bind(r.management_fee_shares.to_string())
                    .bind(r.performance_fee_shares.to_string())
                    .bind(r.meta.timestamp)
                    .bind(&r.meta.transaction_hash)
                    .execute(&mut *tx)
                    .await
                    .map_err(storage)?;
                    inserted += result.rows_affected();
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| IndexerError::Storage(format!("commit batch: {e}")))?;

        debug!(
            table = batch.kind().table_name(),
            submitted = batch.len(),
            inserted,
            "batch stored"
        );
        Ok(inserted)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
