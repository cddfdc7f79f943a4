//! Persistence gateway — the only way records and the watermark reach storage.
//!
//! Every insert is insert-or-ignore on the record's natural key, so replaying a
//! block after a reconnect or restart never duplicates rows.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use alloy_primitives::U256;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::events::{EventKind, RedeemClaimed, RedeemRequested, Report};

/// The singleton watermark row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerStatus {
    /// Highest block whose events are fully persisted.
    pub last_block: u64,
    /// Unix timestamp of the last update.
    pub updated_at: i64,
}

/// A borrowed batch of records of one kind, handed to [`EventStore::bulk_insert`].
#[derive(Debug, Clone, Copy)]
pub enum RecordBatch<'a> {
    RedeemRequested(&'a [RedeemRequested]),
    RedeemClaimed(&'a [RedeemClaimed]),
    Report(&'a [Report]),
}

impl RecordBatch<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::RedeemRequested(_) => EventKind::RedeemRequested,
            Self::RedeemClaimed(_) => EventKind::RedeemClaimed,
            Self::Report(_) => EventKind::Report,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::RedeemRequested(r) => r.len(),
            Self::RedeemClaimed(r) => r.len(),
            Self::Report(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Storage backend for vault records and the indexer watermark.
///
/// Implementations include `MemoryEventStore`, `SqliteEventStore`,
/// and `PostgresEventStore`.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Highest block number stored for `kind`, `None` if the table is empty.
    async fn last_block(&self, kind: EventKind) -> Result<Option<u64>, IndexerError>;

    /// Load the watermark row, if it has ever been written.
    async fn indexer_status(&self) -> Result<Option<IndexerStatus>, IndexerError>;

    /// Upsert the watermark. The stored block never decreases.
    async fn update_indexer_status(&self, block_number: u64) -> Result<(), IndexerError>;

    /// Insert every record whose natural key is not yet stored.
    ///
    /// Returns the number of rows actually inserted; duplicates are skipped.
    async fn bulk_insert(&self, batch: RecordBatch<'_>) -> Result<u64, IndexerError>;
}

// ─── In-memory store ─────────────────────────────────────────────────────────

#[derive(Default)]
struct Tables {
    redeem_requested: BTreeMap<U256, RedeemRequested>,
    redeem_claimed: BTreeMap<U256, RedeemClaimed>,
    reports: BTreeMap<(u64, u32), Report>,
    status: Option<IndexerStatus>,
    /// `(kind, submitted)` for every `bulk_insert` call.
    inserts: Vec<(EventKind, usize)>,
    fail_inserts: bool,
}

/// In-memory event store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryEventStore {
    tables: Mutex<Tables>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, IndexerError> {
        self.tables
            .lock()
            .map_err(|_| IndexerError::Storage("memory store lock poisoned".into()))
    }

    /// Make every subsequent `bulk_insert` fail (or succeed again).
    pub fn set_fail_inserts(&self, fail: bool) {
        if let Ok(mut t) = self.lock() {
            t.fail_inserts = fail;
        }
    }

    /// Seed the watermark row directly.
    pub fn set_status(&self, last_block: u64) {
        if let Ok(mut t) = self.lock() {
            t.status = Some(IndexerStatus {
                last_block,
                updated_at: chrono::Utc::now().timestamp(),
            });
        }
    }

    /// Every `bulk_insert` call so far, as `(kind, records submitted)`.
    pub fn insert_calls(&self) -> Vec<(EventKind, usize)> {
        self.lock().map(|t| t.inserts.clone()).unwrap_or_default()
    }

    /// Number of stored rows for `kind`.
    pub fn count(&self, kind: EventKind) -> usize {
        self.lock()
            .map(|t| match kind {
                EventKind::RedeemRequested => t.redeem_requested.len(),
                EventKind::RedeemClaimed => t.redeem_claimed.len(),
                EventKind::Report => t.reports.len(),
            })
            .unwrap_or(0)
    }

    pub fn redeem_requested(&self) -> Vec<RedeemRequested> {
        self.lock()
            .map(|t| t.redeem_requested.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn redeem_claimed(&self) -> Vec<RedeemClaimed> {
        self.lock()
            .map(|t| t.redeem_claimed.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Stored reports ordered by `(block_number, event_index)`.
    pub fn reports(&self) -> Vec<Report> {
        self.lock()
            .map(|t| t.reports.values().cloned().collect())
            .unwrap_or_default()
    }
}

fn insert_new<K: Ord, V: Clone>(map: &mut BTreeMap<K, V>, rows: &[V], key: impl Fn(&V) -> K) -> u64 {
    let mut inserted = 0;
    for row in rows {
        let k = key(row);
        if !map.contains_key(&k) {
            map.insert(k, row.clone());
            inserted += 1;
        }
    }
    inserted
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn last_block(&self, kind: EventKind) -> Result<Option<u64>, IndexerError> {
        let t = self.lock()?;
        Ok(match kind {
            EventKind::RedeemRequested => t.redeem_requested.values().map(|r| r.meta.block_number).max(),
            EventKind::RedeemClaimed => t.redeem_claimed.values().map(|r| r.meta.block_number).max(),
            EventKind::Report => t.reports.keys().map(|(block, _)| *block).max(),
        })
    }

    async fn indexer_status(&self) -> Result<Option<IndexerStatus>, IndexerError> {
        Ok(self.lock()?.status)
    }

    async fn update_indexer_status(&self, block_number: u64) -> Result<(), IndexerError> {
        let mut t = self.lock()?;
        let last_block = t.status.map_or(block_number, |s| s.last_block.max(block_number));
        t.status = Some(IndexerStatus {
            last_block,
            updated_at: chrono::Utc::now().timestamp(),
        });
        Ok(())
    }

    async fn bulk_insert(&self, batch: RecordBatch<'_>) -> Result<u64, IndexerError> {
        let mut t = self.lock()?;
        t.inserts.push((batch.kind(), batch.len()));
        if t.fail_inserts {
            return Err(IndexerError::Storage(format!(
                "insert into {} rejected",
                batch.kind().table_name()
            )));
        }
        Ok(match batch {
            RecordBatch::RedeemRequested(rows) => {
                insert_new(&mut t.redeem_requested, rows, |r| r.redeem_id)
            }
            RecordBatch::RedeemClaimed(rows) => insert_new(&mut t.redeem_claimed, rows, |r| r.redeem_id),
            RecordBatch::Report(rows) => insert_new(&mut t.reports, rows, Report::key),
        })
    }
}
