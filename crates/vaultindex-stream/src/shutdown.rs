//! Signal-driven shutdown with a final buffer drain.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vaultindex_core::{EventStore, FlushReport, IndexerError, SharedBuffers};

/// Turns SIGINT/SIGTERM into cancellation of the consumer and flushes the
/// buffers it leaves behind.
///
/// Built with the same buffer handle the consumer uses. The consumer holds
/// that lock for a whole block, so `drain` waits for an in-flight block to
/// finish instead of interleaving with it.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    buffers: SharedBuffers,
    store: Arc<dyn EventStore>,
}

impl ShutdownCoordinator {
    pub fn new(buffers: SharedBuffers, store: Arc<dyn EventStore>) -> Self {
        Self {
            token: CancellationToken::new(),
            buffers,
            store,
        }
    }

    /// Token the consumer observes; cancelled on the first signal.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel without a signal.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Spawn the signal listener.
    pub fn listen(&self) -> JoinHandle<()> {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                signal = wait_for_signal() => {
                    info!(signal, "termination signal received, stopping after the current block");
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
        })
    }

    /// Flush every buffer. Safe to call more than once.
    pub async fn drain(&self) -> Result<Vec<FlushReport>, IndexerError> {
        let mut buffers = self.buffers.lock().await;
        let pending = buffers.pending();
        if pending > 0 {
            info!(pending, "draining ingestion buffers");
        }
        match buffers.flush_all(self.store.as_ref()).await {
            Ok(reports) => Ok(reports),
            Err(e) => {
                warn!(error = %e, remaining = buffers.pending(), "final flush failed");
                Err(e)
            }
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        },
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl+C only");
            let _ = tokio::signal::ctrl_c().await;
            "SIGINT"
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "SIGINT"
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultindex_core::{
        EventBuffers, EventKind, EventMeta, MemoryEventStore, Report, VaultEvent, U256,
    };

    fn report(block: u64) -> VaultEvent {
        VaultEvent::Report(Report {
            new_epoch: U256::from(block),
            new_handled_epoch_len: U256::ZERO,
            total_supply: U256::ZERO,
            total_assets: U256::ZERO,
            management_fee_shares: U256::ZERO,
            performance_fee_shares: U256::ZERO,
            meta: EventMeta {
                block_number: block,
                timestamp: 0,
                transaction_hash: format!("0x{block:064x}"),
                event_index: 0,
            },
        })
    }

    #[tokio::test]
    async fn drain_flushes_pending_records() {
        let store = Arc::new(MemoryEventStore::new());
        let buffers = EventBuffers::shared(100);
        buffers.lock().await.push(report(1));
        buffers.lock().await.push(report(2));

        let coordinator = ShutdownCoordinator::new(buffers.clone(), store.clone());
        let reports = coordinator.drain().await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].inserted, 2);
        assert_eq!(store.count(EventKind::Report), 2);
        assert_eq!(buffers.lock().await.pending(), 0);

        // second drain is a no-op
        assert!(coordinator.drain().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_drain_keeps_records() {
        let store = Arc::new(MemoryEventStore::new());
        store.set_fail_inserts(true);
        let buffers = EventBuffers::shared(100);
        buffers.lock().await.push(report(1));

        let coordinator = ShutdownCoordinator::new(buffers.clone(), store.clone());
        assert!(coordinator.drain().await.is_err());
        assert_eq!(buffers.lock().await.pending(), 1);
    }

    #[tokio::test]
    async fn trigger_cancels_the_token() {
        let coordinator = ShutdownCoordinator::new(EventBuffers::shared(1), Arc::new(MemoryEventStore::new()));
        let token = coordinator.token();
        let listener = coordinator.listen();
        coordinator.trigger();
        assert!(token.is_cancelled());
        listener.await.unwrap();
    }
}
