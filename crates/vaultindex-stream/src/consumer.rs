//! `StreamConsumer` — the long-lived subscription loop.
//!
//! ```text
//! Connecting ──subscribe ok──▶ Streaming ──block──▶ decode → buffer → flush → watermark
//!     ▲                            │
//!     │                 transient error (13, 14)
//!     │                            ▼
//!     └──────backoff sleep──── Reconnecting
//!
//! non-transient error | retries exhausted | protocol violation | clean end ──▶ Terminated
//! ```
//!
//! Blocks are processed strictly one at a time in delivery order. Cancellation
//! is only observed while waiting for the next message, a connection, or a
//! backoff sleep, never in the middle of a block.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vaultindex_core::{
    decode, DecodeFailurePolicy, EventMeta, EventStore, Felt, IndexerConfig, IndexerError,
    IngestMetrics, SelectorTable, SharedBuffers,
};

use crate::backoff::BackoffPolicy;
use crate::client::{BlockStream, StreamClient, StreamError};
use crate::message::{BlockMessage, Cursor, Finality, StreamFilter, SubscriptionRequest};

/// Where the consumer is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Connecting,
    Streaming,
    Reconnecting,
    Terminated,
}

impl std::fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Streaming => write!(f, "streaming"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// How a run that did not fail came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The shutdown token was cancelled.
    Shutdown { last_block: Option<u64> },
}

/// Why one connection stopped delivering blocks.
enum ConnectionEnd {
    Shutdown,
    Closed,
    Failed(StreamError),
}

pub struct StreamConsumer {
    client: Arc<dyn StreamClient>,
    store: Arc<dyn EventStore>,
    buffers: SharedBuffers,
    vault: Felt,
    selectors: SelectorTable,
    filter: StreamFilter,
    finality: Finality,
    backoff: BackoffPolicy,
    decode_policy: DecodeFailurePolicy,
    metrics: Arc<IngestMetrics>,
    shutdown: CancellationToken,
    state: watch::Sender<ConsumerState>,
    last_block: watch::Sender<Option<u64>>,
}

impl StreamConsumer {
    /// Build a consumer for the vault named in `config`, routing the events
    /// `selectors` knows about. Everything else is counted and skipped.
    pub fn new(
        client: Arc<dyn StreamClient>,
        store: Arc<dyn EventStore>,
        buffers: SharedBuffers,
        selectors: SelectorTable,
        config: &IndexerConfig,
    ) -> Result<Self, IndexerError> {
        let vault = config.vault_felt()?;
        Ok(Self {
            client,
            store,
            buffers,
            filter: StreamFilter::for_contract(vault, &selectors),
            vault,
            selectors,
            finality: Finality::Accepted,
            backoff: BackoffPolicy::new(config.backoff.clone()),
            decode_policy: config.decode_failure_policy,
            metrics: Arc::new(IngestMetrics::from_global()),
            shutdown: CancellationToken::new(),
            state: watch::Sender::new(ConsumerState::Connecting),
            last_block: watch::Sender::new(None),
        })
    }

    /// Replace the selector table; the filter is rebuilt to match.
    pub fn with_selectors(mut self, selectors: SelectorTable) -> Self {
        self.filter = StreamFilter::for_contract(self.vault, &selectors);
        self.selectors = selectors;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<IngestMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Receiver that follows state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Highest block fully processed by this consumer, if any.
    pub fn last_indexed_block(&self) -> Option<u64> {
        *self.last_block.borrow()
    }

    pub fn metrics(&self) -> Arc<IngestMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn filter(&self) -> &StreamFilter {
        &self.filter
    }

    /// Stream from `start_block` (inclusive) until shutdown or a terminal error.
    ///
    /// Never returns `Ok` for a stream that ended by itself: a live
    /// subscription is expected to run forever, so that is
    /// [`IndexerError::StreamEnded`].
    pub async fn run(&self, start_block: u64) -> Result<RunOutcome, IndexerError> {
        let result = self.drive(start_block).await;
        self.set_state(ConsumerState::Terminated);
        match &result {
            Ok(RunOutcome::Shutdown { last_block }) => {
                info!(last_block = ?last_block, "consumer stopped by shutdown")
            }
            Err(e) => error!(error = %e, last_block = ?self.last_indexed_block(), "consumer terminated"),
        }
        result
    }

    async fn drive(&self, start_block: u64) -> Result<RunOutcome, IndexerError> {
        let mut cursor = start_block;
        let mut failures: u32 = 0;

        loop {
            self.set_state(ConsumerState::Connecting);
            let request = self.request(cursor);
            let subscribed = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(self.shutdown_outcome()),
                res = self.client.subscribe(request) => res,
            };

            let err = match subscribed {
                Ok(mut stream) => {
                    self.set_state(ConsumerState::Streaming);
                    info!(cursor, "streaming");
                    match self.consume(&mut stream, &mut cursor, &mut failures).await? {
                        ConnectionEnd::Shutdown => return Ok(self.shutdown_outcome()),
                        ConnectionEnd::Closed => {
                            return Err(IndexerError::StreamEnded {
                                last_block: self.last_indexed_block(),
                            })
                        }
                        ConnectionEnd::Failed(e) => e,
                    }
                }
                Err(e) => e,
            };

            let code = err.code();
            if !code.is_transient() {
                return Err(IndexerError::Transport {
                    code: code.0,
                    message: err.to_string(),
                });
            }
            let Some(delay) = self.backoff.next_delay(failures) else {
                return Err(IndexerError::RetriesExhausted {
                    attempts: failures,
                    code: code.0,
                    message: err.to_string(),
                });
            };
            failures += 1;
            self.set_state(ConsumerState::Reconnecting);
            self.metrics.reconnected(code.0);
            warn!(
                attempt = failures,
                max_retries = self.backoff.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                %code,
                error = %err,
                cursor,
                "transient stream error, reconnecting"
            );

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(self.shutdown_outcome()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Drain one connection. Terminal errors propagate; stream errors are
    /// returned for classification.
    async fn consume(
        &self,
        stream: &mut BlockStream,
        cursor: &mut u64,
        failures: &mut u32,
    ) -> Result<ConnectionEnd, IndexerError> {
        let connected_at = *cursor;
        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(ConnectionEnd::Shutdown),
                next = stream.next() => next,
            };
            let block = match next {
                None => return Ok(ConnectionEnd::Closed),
                Some(Err(e)) => return Ok(ConnectionEnd::Failed(e)),
                Some(Ok(block)) => block,
            };
            let number = self.process_block(&block).await?;
            *cursor = (*cursor).max(number);
            // Only progress past the resume point refills the retry budget;
            // replaying the cursor block on every reconnect must not.
            if number > connected_at {
                *failures = 0;
            }
        }
    }

    /// Decode, buffer and persist one block, then advance the watermark.
    ///
    /// Returns the block number. The buffer lock is held throughout, so a
    /// shutdown drain never sees a half-processed block.
    pub async fn process_block(&self, block: &BlockMessage) -> Result<u64, IndexerError> {
        let number = block
            .block_number()
            .ok_or_else(|| IndexerError::protocol("block header without block number"))?;
        let timestamp = block.timestamp().ok_or_else(|| {
            IndexerError::protocol(format!("block {number} header without timestamp"))
        })?;

        let store = self.store.as_ref();
        let buffers = Arc::clone(&self.buffers);
        let mut buffers = buffers.lock().await;

        for (position, event) in block.events.iter().enumerate() {
            let tx_hash = event.transaction_hash.as_deref().ok_or_else(|| {
                IndexerError::protocol(format!(
                    "event {position} in block {number} without transaction hash"
                ))
            })?;
            let selector = event.keys.first().ok_or_else(|| {
                IndexerError::protocol(format!("event {position} in block {number} without selector"))
            })?;
            let data = event.data.as_deref().ok_or_else(|| {
                IndexerError::protocol(format!("event {position} in block {number} without data"))
            })?;
            let transaction_hash = tx_hash.parse::<Felt>().map_err(|e| {
                IndexerError::protocol(format!("block {number}: transaction hash {tx_hash:?}: {e}"))
            })?;
            let selector = selector.parse::<Felt>().map_err(|e| {
                IndexerError::protocol(format!("block {number}: selector {selector:?}: {e}"))
            })?;

            let Some(kind) = self.selectors.kind_of(&selector) else {
                self.metrics.unknown_event();
                debug!(block = number, %selector, "ignoring event with unknown selector");
                continue;
            };

            let meta = EventMeta {
                block_number: number,
                timestamp,
                transaction_hash: transaction_hash.to_fixed_hex(),
                event_index: event.index.unwrap_or(position as u32),
            };
            match decode(kind, meta, data) {
                Ok(record) => {
                    buffers.push(record);
                    self.metrics.event_buffered(kind);
                    if let Some(report) = buffers.flush_if_threshold(kind, store).await? {
                        self.metrics.rows_flushed(report.kind, report.submitted, report.inserted);
                    }
                }
                Err(source) => {
                    self.metrics.decode_failed(kind);
                    match self.decode_policy {
                        DecodeFailurePolicy::Skip => warn!(
                            block = number,
                            tx = %transaction_hash,
                            %kind,
                            error = %source,
                            "skipping undecodable event"
                        ),
                        DecodeFailurePolicy::Abort => {
                            return Err(IndexerError::Decode {
                                kind,
                                block_number: number,
                                transaction_hash: transaction_hash.to_fixed_hex(),
                                source,
                            })
                        }
                    }
                }
            }
        }

        for report in buffers.flush_all(store).await? {
            self.metrics.rows_flushed(report.kind, report.submitted, report.inserted);
        }
        store.update_indexer_status(number).await?;
        self.last_block.send_modify(|last| {
            *last = Some(last.map_or(number, |prev| prev.max(number)));
        });
        self.metrics.block_processed();
        debug!(block = number, events = block.events.len(), "block processed");
        Ok(number)
    }

    fn request(&self, cursor: u64) -> SubscriptionRequest {
        SubscriptionRequest {
            filter: self.filter.clone(),
            finality: self.finality,
            starting_cursor: Some(Cursor { order_key: cursor }),
        }
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.send_replace(state);
    }

    fn shutdown_outcome(&self) -> RunOutcome {
        RunOutcome::Shutdown {
            last_block: self.last_indexed_block(),
        }
    }
}
