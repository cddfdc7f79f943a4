//! Error types for the ingestion pipeline.

use thiserror::Error;

use crate::events::EventKind;
use crate::felt::FeltError;

/// Errors raised while turning a raw data array into a typed record.
///
/// The decoder never decides whether a failure is fatal; the consumer's
/// [`DecodeFailurePolicy`](crate::config::DecodeFailurePolicy) does.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("{kind} expects {expected} data slots, got {actual}")]
    TooShort {
        kind: EventKind,
        expected: usize,
        actual: usize,
    },

    #[error("slot {index} is not a field element: {source}")]
    InvalidFelt {
        index: usize,
        #[source]
        source: FeltError,
    },

    #[error("slot {index} does not fit in a u256 half (128 bits)")]
    U256HalfOverflow { index: usize },

    #[error("slot {index} is not a contract address: {value}")]
    InvalidAddress { index: usize, value: String },
}

/// Errors that terminate (or would terminate) an indexing run.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// The stream delivered a message missing a mandatory field.
    #[error("Protocol violation: {reason}")]
    Protocol { reason: String },

    /// A transport error the consumer does not retry.
    #[error("Stream transport error {code}: {message}")]
    Transport { code: u32, message: String },

    /// Transient transport errors kept occurring past the retry budget.
    #[error("Gave up after {attempts} reconnect attempts (last error {code}: {message})")]
    RetriesExhausted {
        attempts: u32,
        code: u32,
        message: String,
    },

    /// The live subscription finished without an error.
    #[error("Stream ended without reconnect (last indexed block: {last_block:?})")]
    StreamEnded { last_block: Option<u64> },

    /// An event could not be decoded and the policy is to abort.
    #[error("Failed to decode {kind} in block {block_number} (tx {transaction_hash}): {source}")]
    Decode {
        kind: EventKind,
        block_number: u64,
        transaction_hash: String,
        #[source]
        source: DecodeError,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IndexerError {
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }
}
