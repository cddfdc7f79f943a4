//! Startup resolution of the block to resume streaming from.

use serde::Serialize;
use tracing::info;

use crate::config::IndexerConfig;
use crate::error::IndexerError;
use crate::events::EventKind;
use crate::store::{EventStore, IndexerStatus};

/// The resolved resume block and what it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResumePoint {
    /// First block the subscription delivers.
    pub start_block: u64,
    /// `true` when the configured start block overrode persisted state.
    pub forced: bool,
    /// Per-table high-water marks, `None` for an empty table.
    pub table_marks: Vec<(EventKind, Option<u64>)>,
    pub indexer_status: Option<IndexerStatus>,
    pub configured_start: u64,
}

/// Combines persisted high-water marks with the configured start block.
pub struct WatermarkResolver<'a> {
    store: &'a dyn EventStore,
}

impl<'a> WatermarkResolver<'a> {
    pub fn new(store: &'a dyn EventStore) -> Self {
        Self { store }
    }

    /// Resolve the resume block.
    ///
    /// With `force_start_block` the configured start wins unconditionally.
    /// Otherwise the result is the maximum over every table's last block, the
    /// indexer status, and the configured start; missing values count as 0.
    /// Taking the maximum across tables is what keeps a block that carried
    /// several event kinds from being skipped.
    pub async fn resolve(&self, config: &IndexerConfig) -> Result<ResumePoint, IndexerError> {
        let mut table_marks = Vec::with_capacity(EventKind::ALL.len());
        for kind in EventKind::ALL {
            table_marks.push((kind, self.store.last_block(kind).await?));
        }
        let indexer_status = self.store.indexer_status().await?;

        let start_block = if config.force_start_block {
            config.start_block
        } else {
            table_marks
                .iter()
                .filter_map(|(_, mark)| *mark)
                .chain(indexer_status.map(|s| s.last_block))
                .fold(config.start_block, u64::max)
        };

        info!(
            start_block,
            forced = config.force_start_block,
            configured = config.start_block,
            status = ?indexer_status.map(|s| s.last_block),
            "resume point resolved"
        );

        Ok(ResumePoint {
            start_block,
            forced: config.force_start_block,
            table_marks,
            indexer_status,
            configured_start: config.start_block,
        })
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::U256;

    use super::*;
    use crate::events::{EventMeta, RedeemClaimed, RedeemRequested, Report};
    use crate::store::{MemoryEventStore, RecordBatch};

    fn meta(block_number: u64) -> EventMeta {
        EventMeta {
            block_number,
            timestamp: 0,
            transaction_hash: format!("0x{block_number:064x}"),
            event_index: 0,
        }
    }

    /// Store with table marks {10, 12, 9} and indexer status 11.
    async fn seeded() -> MemoryEventStore {
        let store = MemoryEventStore::new();
        let requested = [RedeemRequested {
            owner: format!("0x{:064x}", 1),
            receiver: format!("0x{:064x}", 1),
            shares: U256::from(1u64),
            assets: U256::from(1u64),
            redeem_id: U256::from(1u64),
            epoch: U256::ZERO,
            meta: meta(10),
        }];
        let claimed = [RedeemClaimed {
            receiver: format!("0x{:064x}", 1),
            redeem_request_nominal: U256::from(1u64),
            assets: U256::from(1u64),
            redeem_id: U256::from(1u64),
            epoch: U256::ZERO,
            meta: meta(12),
        }];
        let reports = [Report {
            new_epoch: U256::from(1u64),
            new_handled_epoch_len: U256::ZERO,
            total_supply: U256::ZERO,
            total_assets: U256::ZERO,
            management_fee_shares: U256::ZERO,
            performance_fee_shares: U256::ZERO,
            meta: meta(9),
        }];
        store.bulk_insert(RecordBatch::RedeemRequested(&requested)).await.unwrap();
        store.bulk_insert(RecordBatch::RedeemClaimed(&claimed)).await.unwrap();
        store.bulk_insert(RecordBatch::Report(&reports)).await.unwrap();
        store.update_indexer_status(11).await.unwrap();
        store
    }

    #[tokio::test]
    async fn resumes_from_highest_mark() {
        let store = seeded().await;
        let point = WatermarkResolver::new(&store)
            .resolve(&IndexerConfig::new("0x1"))
            .await
            .unwrap();
        assert_eq!(point.start_block, 12);
        assert!(!point.forced);
        assert_eq!(point.table_marks[1], (EventKind::RedeemClaimed, Some(12)));
    }

    #[tokio::test]
    async fn configured_start_is_a_floor() {
        let store = seeded().await;
        let mut config = IndexerConfig::new("0x1");
        config.start_block = 40;
        let point = WatermarkResolver::new(&store).resolve(&config).await.unwrap();
        assert_eq!(point.start_block, 40);
    }

    #[tokio::test]
    async fn force_start_overrides_persisted_state() {
        let store = seeded().await;
        let mut config = IndexerConfig::new("0x1");
        config.start_block = 500;
        config.force_start_block = true;
        let point = WatermarkResolver::new(&store).resolve(&config).await.unwrap();
        assert_eq!(point.start_block, 500);

        config.start_block = 3;
        let rewind = WatermarkResolver::new(&store).resolve(&config).await.unwrap();
        assert_eq!(rewind.start_block, 3);
    }

    #[tokio::test]
    async fn empty_store_uses_configured_start() {
        let store = MemoryEventStore::new();
        let point = WatermarkResolver::new(&store)
            .resolve(&IndexerConfig::new("0x1"))
            .await
            .unwrap();
        assert_eq!(point.start_block, 0);
        assert!(point.indexer_status.is_none());
    }
}
