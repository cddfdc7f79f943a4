//! vaultindex-stream — the live side of the indexer.
//!
//! A [`StreamConsumer`] subscribes to the event stream through a
//! [`StreamClient`], turns every delivered block into persisted records, and
//! reconnects with [`BackoffPolicy`] when the transport fails transiently. A
//! [`ShutdownCoordinator`] stops it on SIGINT/SIGTERM and drains what is left.
//!
//! # Usage
//! ```no_run
//! use std::sync::Arc;
//! use vaultindex_core::{
//!     EventBuffers, IndexerConfig, MemoryEventStore, SelectorTable, WatermarkResolver,
//! };
//! use vaultindex_stream::{ShutdownCoordinator, StreamConsumer, WsStreamClient};
//!
//! # async fn demo() -> Result<(), vaultindex_core::IndexerError> {
//! let config = IndexerConfig::new("0x0123");
//! let store = Arc::new(MemoryEventStore::new());
//! let buffers = EventBuffers::shared(config.batch_size);
//! let shutdown = ShutdownCoordinator::new(buffers.clone(), store.clone());
//! shutdown.listen();
//!
//! let start = WatermarkResolver::new(store.as_ref()).resolve(&config).await?;
//! let client = Arc::new(WsStreamClient::new(&config.stream_url));
//! let consumer = StreamConsumer::new(client, store, buffers, SelectorTable::vault(), &config)?
//!     .with_shutdown(shutdown.token());
//! let outcome = consumer.run(start.start_block).await;
//! shutdown.drain().await?;
//! outcome?;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod client;
pub mod consumer;
pub mod message;
pub mod shutdown;
pub mod ws_client;

pub use backoff::BackoffPolicy;
pub use client::{BlockStream, StreamClient, StreamError};
pub use consumer::{ConsumerState, RunOutcome, StreamConsumer};
pub use message::{
    BlockHeader, BlockMessage, Cursor, EventFilter, Finality, HeaderFilter, StatusCode,
    StreamFilter, StreamedEvent, SubscriptionRequest,
};
pub use shutdown::ShutdownCoordinator;
pub use ws_client::WsStreamClient;
