//! Per-kind ingestion buffers.
//!
//! Decoded records accumulate in memory and are written with one bulk insert
//! when a buffer reaches the batch size, at every block boundary, and on
//! shutdown. A buffer is cleared only after its insert succeeded, so a failed
//! flush can be retried by the shutdown drain without losing records.

use std::sync::Arc;

use tracing::debug;

use crate::error::IndexerError;
use crate::events::{EventKind, RedeemClaimed, RedeemRequested, Report, VaultEvent};
use crate::store::{EventStore, RecordBatch};

/// Buffers shared between the consumer loop and the shutdown path.
///
/// The consumer holds the lock for a whole block, so a drain never observes a
/// half-processed block.
pub type SharedBuffers = Arc<tokio::sync::Mutex<EventBuffers>>;

/// A record type with its own buffer and table.
pub trait BufferedRecord: Send + Sync {
    const KIND: EventKind;

    fn as_batch(records: &[Self]) -> RecordBatch<'_>
    where
        Self: Sized;
}

impl BufferedRecord for RedeemRequested {
    const KIND: EventKind = EventKind::RedeemRequested;

    fn as_batch(records: &[Self]) -> RecordBatch<'_> {
        RecordBatch::RedeemRequested(records)
    }
}

impl BufferedRecord for RedeemClaimed {
    const KIND: EventKind = EventKind::RedeemClaimed;

    fn as_batch(records: &[Self]) -> RecordBatch<'_> {
        RecordBatch::RedeemClaimed(records)
    }
}

impl BufferedRecord for Report {
    const KIND: EventKind = EventKind::Report;

    fn as_batch(records: &[Self]) -> RecordBatch<'_> {
        RecordBatch::Report(records)
    }
}

/// Outcome of one bulk insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub kind: EventKind,
    /// Records handed to the store.
    pub submitted: u64,
    /// Rows the store actually inserted; the rest were duplicates.
    pub inserted: u64,
}

impl FlushReport {
    pub fn duplicates(&self) -> u64 {
        self.submitted.saturating_sub(self.inserted)
    }
}

/// In-memory accumulator for one record type.
#[derive(Debug)]
pub struct IngestionBuffer<T> {
    records: Vec<T>,
    batch_size: usize,
}

impl<T: BufferedRecord> IngestionBuffer<T> {
    pub fn new(batch_size: usize) -> Self {
        Self {
            records: Vec::with_capacity(batch_size),
            batch_size: batch_size.max(1),
        }
    }

    pub fn append(&mut self, record: T) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// `true` once the buffer holds a full batch.
    pub fn is_due(&self) -> bool {
        self.records.len() >= self.batch_size
    }

    /// Flush only if a full batch is waiting.
    pub async fn flush_if_threshold(
        &mut self,
        store: &dyn EventStore,
    ) -> Result<Option<FlushReport>, IndexerError> {
        if !self.is_due() {
            return Ok(None);
        }
        self.flush_now(store).await.map(Some)
    }

    /// Write everything buffered and clear the buffer.
    ///
    /// An empty buffer does not touch the store.
    pub async fn flush_now(&mut self, store: &dyn EventStore) -> Result<FlushReport, IndexerError> {
        let submitted = self.records.len() as u64;
        if submitted == 0 {
            return Ok(FlushReport {
                kind: T::KIND,
                submitted: 0,
                inserted: 0,
            });
        }
        let inserted = store.bulk_insert(T::as_batch(&self.records)).await?;
        self.records.clear();
        debug!(kind = %T::KIND, submitted, inserted, "buffer flushed");
        Ok(FlushReport {
            kind: T::KIND,
            submitted,
            inserted,
        })
    }
}

/// The three per-kind buffers of a run.
#[derive(Debug)]
pub struct EventBuffers {
    redeem_requested: IngestionBuffer<RedeemRequested>,
    redeem_claimed: IngestionBuffer<RedeemClaimed>,
    reports: IngestionBuffer<Report>,
}

impl EventBuffers {
    pub fn new(batch_size: usize) -> Self {
        Self {
            redeem_requested: IngestionBuffer::new(batch_size),
            redeem_claimed: IngestionBuffer::new(batch_size),
            reports: IngestionBuffer::new(batch_size),
        }
    }

    /// Wrap fresh buffers for sharing with a `ShutdownCoordinator`.
    pub fn shared(batch_size: usize) -> SharedBuffers {
        Arc::new(tokio::sync::Mutex::new(Self::new(batch_size)))
    }

    /// Append a decoded event to its buffer and return the buffer's kind.
    pub fn push(&mut self, event: VaultEvent) -> EventKind {
        let kind = event.kind();
        match event {
            VaultEvent::RedeemRequested(r) => self.redeem_requested.append(r),
            VaultEvent::RedeemClaimed(r) => self.redeem_claimed.append(r),
            VaultEvent::Report(r) => self.reports.append(r),
        }
        kind
    }

    /// Records waiting in the buffer for `kind`.
    pub fn pending_of(&self, kind: EventKind) -> usize {
        match kind {
            EventKind::RedeemRequested => self.redeem_requested.len(),
            EventKind::RedeemClaimed => self.redeem_claimed.len(),
            EventKind::Report => self.reports.len(),
        }
    }

    /// Records waiting across all buffers.
    pub fn pending(&self) -> usize {
        EventKind::ALL.iter().map(|k| self.pending_of(*k)).sum()
    }

    /// Flush the buffer for `kind` if it holds a full batch.
    pub async fn flush_if_threshold(
        &mut self,
        kind: EventKind,
        store: &dyn EventStore,
    ) -> Result<Option<FlushReport>, IndexerError> {
        match kind {
            EventKind::RedeemRequested => self.redeem_requested.flush_if_threshold(store).await,
            EventKind::RedeemClaimed => self.redeem_claimed.flush_if_threshold(store).await,
            EventKind::Report => self.reports.flush_if_threshold(store).await,
        }
    }

    /// Flush every non-empty buffer, in kind order.
    ///
    /// Stops at the first failing insert; buffers not yet flushed keep their
    /// records.
    pub async fn flush_all(&mut self, store: &dyn EventStore) -> Result<Vec<FlushReport>, IndexerError> {
        let mut reports = Vec::with_capacity(3);
        if !self.redeem_requested.is_empty() {
            reports.push(self.redeem_requested.flush_now(store).await?);
        }
        if !self.redeem_claimed.is_empty() {
            reports.push(self.redeem_claimed.flush_now(store).await?);
        }
        if !self.reports.is_empty() {
            reports.push(self.reports.flush_now(store).await?);
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::U256;

    use super::*;
    use crate::events::EventMeta;
    use crate::store::MemoryEventStore;

    fn claimed(redeem_id: u64) -> RedeemClaimed {
        RedeemClaimed {
            receiver: format!("0x{:064x}", 9),
            redeem_request_nominal: U256::from(10u64),
            assets: U256::from(9u64),
            redeem_id: U256::from(redeem_id),
            epoch: U256::from(1u64),
            meta: EventMeta {
                block_number: 100,
                timestamp: 1_700_000_000,
                transaction_hash: format!("0x{redeem_id:064x}"),
                event_index: redeem_id as u32,
            },
        }
    }

    #[tokio::test]
    async fn full_batch_triggers_exactly_one_flush() {
        let store = MemoryEventStore::new();
        let mut buf = IngestionBuffer::new(4);
        for id in 0..4 {
            assert!(buf.flush_if_threshold(&store).await.unwrap().is_none());
            buf.append(claimed(id));
        }
        let report = buf.flush_if_threshold(&store).await.unwrap().unwrap();
        assert_eq!(report.submitted, 4);
        assert_eq!(report.inserted, 4);
        assert!(buf.is_empty());
        assert_eq!(store.insert_calls(), vec![(EventKind::RedeemClaimed, 4)]);
    }

    #[tokio::test]
    async fn failed_flush_keeps_records() {
        let store = MemoryEventStore::new();
        let mut buf = IngestionBuffer::new(10);
        buf.append(claimed(1));
        buf.append(claimed(2));

        store.set_fail_inserts(true);
        assert!(buf.flush_now(&store).await.is_err());
        assert_eq!(buf.len(), 2);

        store.set_fail_inserts(false);
        let report = buf.flush_now(&store).await.unwrap();
        assert_eq!(report.inserted, 2);
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn empty_flush_skips_the_store() {
        let store = MemoryEventStore::new();
        let mut buffers = EventBuffers::new(10);
        assert!(buffers.flush_all(&store).await.unwrap().is_empty());
        assert!(store.insert_calls().is_empty());
    }

    #[tokio::test]
    async fn replayed_records_count_as_duplicates() {
        let store = MemoryEventStore::new();
        let mut buffers = EventBuffers::new(10);
        buffers.push(VaultEvent::RedeemClaimed(claimed(1)));
        buffers.flush_all(&store).await.unwrap();

        buffers.push(VaultEvent::RedeemClaimed(claimed(1)));
        buffers.push(VaultEvent::RedeemClaimed(claimed(2)));
        assert_eq!(buffers.pending(), 2);
        let reports = buffers.flush_all(&store).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].inserted, 1);
        assert_eq!(reports[0].duplicates(), 1);
        assert_eq!(buffers.pending(), 0);
    }

    #[tokio::test]
    async fn threshold_is_per_kind() {
        let store = MemoryEventStore::new();
        let mut buffers = EventBuffers::new(2);
        let kind = buffers.push(VaultEvent::RedeemClaimed(claimed(1)));
        assert_eq!(kind, EventKind::RedeemClaimed);
        assert!(buffers.flush_if_threshold(kind, &store).await.unwrap().is_none());
        buffers.push(VaultEvent::RedeemClaimed(claimed(2)));
        assert!(buffers.flush_if_threshold(EventKind::Report, &store).await.unwrap().is_none());
        let flushed = buffers.flush_if_threshold(kind, &store).await.unwrap();
        assert_eq!(flushed.map(|r| r.submitted), Some(2));
    }
}
