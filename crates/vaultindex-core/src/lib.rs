//! vaultindex-core — decoding, buffering and resumption for the vault event indexer.
//!
//! # Architecture
//!
//! ```text
//! WatermarkResolver (startup) → StreamConsumer (vaultindex-stream)
//!                                    ├── SelectorTable   (selector → EventKind)
//!                                    ├── decoder         (felts → typed records)
//!                                    ├── EventBuffers    (per-kind batching)
//!                                    └── EventStore      (memory / SQLite / Postgres)
//! ```

pub mod buffer;
pub mod config;
pub mod decoder;
pub mod error;
pub mod events;
pub mod felt;
pub mod metrics;
pub mod selector;
pub mod store;
pub mod watermark;

pub use buffer::{EventBuffers, FlushReport, IngestionBuffer, SharedBuffers};
pub use config::{BackoffConfig, DecodeFailurePolicy, IndexerConfig};
pub use decoder::decode;
pub use error::{DecodeError, IndexerError};
pub use events::{EventKind, EventMeta, RedeemClaimed, RedeemRequested, Report, VaultEvent};
pub use felt::{Felt, FeltError};
pub use metrics::{IngestMetrics, MetricsSnapshot};
pub use selector::{starknet_keccak, SelectorTable};
pub use store::{EventStore, IndexerStatus, MemoryEventStore, RecordBatch};
pub use watermark::{ResumePoint, WatermarkResolver};

/// 256-bit unsigned integer used for every on-chain amount and identifier.
pub use alloy_primitives::U256;
