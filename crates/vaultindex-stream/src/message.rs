//! Wire model of the event stream: filters, cursors and delivered blocks.
//!
//! Delivered messages keep every field optional. Whether a missing field is
//! a protocol violation is the consumer's call, not the parser's.

use std::fmt;

use serde::{Deserialize, Serialize};
use vaultindex_core::{Felt, SelectorTable};

// ─── Status codes ────────────────────────────────────────────────────────────

/// Numeric transport status, following the gRPC code space the stream uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub u32);

impl StatusCode {
    pub const CANCELLED: StatusCode = StatusCode(1);
    pub const INVALID_ARGUMENT: StatusCode = StatusCode(3);
    pub const NOT_FOUND: StatusCode = StatusCode(5);
    pub const PERMISSION_DENIED: StatusCode = StatusCode(7);
    pub const INTERNAL: StatusCode = StatusCode(13);
    pub const UNAVAILABLE: StatusCode = StatusCode(14);
    pub const UNAUTHENTICATED: StatusCode = StatusCode(16);

    /// Only internal errors and unavailability are worth reconnecting for.
    pub fn is_transient(&self) -> bool {
        matches!(*self, Self::INTERNAL | Self::UNAVAILABLE)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::CANCELLED => "CANCELLED",
            Self::INVALID_ARGUMENT => "INVALID_ARGUMENT",
            Self::NOT_FOUND => "NOT_FOUND",
            Self::PERMISSION_DENIED => "PERMISSION_DENIED",
            Self::INTERNAL => "INTERNAL",
            Self::UNAVAILABLE => "UNAVAILABLE",
            Self::UNAUTHENTICATED => "UNAUTHENTICATED",
            _ => return write!(f, "{}", self.0),
        };
        write!(f, "{}({})", name, self.0)
    }
}

// ─── Subscription ────────────────────────────────────────────────────────────

/// Consensus tier of the data requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Finality {
    Pending,
    /// Accepted on L2, not yet final on L1.
    #[default]
    Accepted,
    Finalized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderFilter {
    /// `false` delivers headers with every block, not only with matches.
    pub weak: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    pub from_address: Felt,
    /// `keys[0]` must equal this selector.
    pub keys: Vec<Felt>,
    pub include_transaction: bool,
    pub include_receipt: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFilter {
    pub header: HeaderFilter,
    pub events: Vec<EventFilter>,
}

impl StreamFilter {
    /// One event filter per registered selector, all scoped to `contract`.
    pub fn for_contract(contract: Felt, selectors: &SelectorTable) -> Self {
        let events = selectors
            .selectors()
            .into_iter()
            .map(|(_, selector)| EventFilter {
                from_address: contract,
                keys: vec![selector],
                include_transaction: true,
                include_receipt: true,
            })
            .collect();
        Self {
            header: HeaderFilter { weak: false },
            events,
        }
    }
}

/// Resumable stream position. Delivery starts at `order_key`, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub order_key: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    pub filter: StreamFilter,
    pub finality: Finality,
    pub starting_cursor: Option<Cursor>,
}

// ─── Delivered data ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    #[serde(default)]
    pub block_number: Option<u64>,
    /// Unix seconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub block_hash: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamedEvent {
    /// Position of the event inside its block.
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub from_address: Option<String>,
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub data: Option<Vec<String>>,
}

/// One delivered block with the events matching the filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMessage {
    #[serde(default)]
    pub header: Option<BlockHeader>,
    #[serde(default)]
    pub events: Vec<StreamedEvent>,
}

impl BlockMessage {
    pub fn block_number(&self) -> Option<u64> {
        self.header.as_ref().and_then(|h| h.block_number)
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.header.as_ref().and_then(|h| h.timestamp)
    }
}
