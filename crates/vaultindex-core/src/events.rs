//! Typed vault event records.
//!
//! Every record is an append-only mirror of one on-chain event. Identity is
//! the natural on-chain key: `redeem_id` for redemptions, the
//! `(block_number, event_index)` pair for reports.

use std::fmt;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

// ─── EventKind ───────────────────────────────────────────────────────────────

/// The three vault events the pipeline ingests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    RedeemRequested,
    RedeemClaimed,
    Report,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [
        EventKind::RedeemRequested,
        EventKind::RedeemClaimed,
        EventKind::Report,
    ];

    /// The Cairo event name, hashed to obtain the selector.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RedeemRequested => "RedeemRequested",
            Self::RedeemClaimed => "RedeemClaimed",
            Self::Report => "Report",
        }
    }

    /// Number of data slots the positional schema requires.
    pub fn slot_count(&self) -> usize {
        match self {
            // owner, receiver, shares(2), assets(2), redeem_id(2), epoch(2)
            Self::RedeemRequested => 10,
            // receiver, nominal(2), assets(2), redeem_id(2), epoch(2)
            Self::RedeemClaimed => 9,
            // six u256 values
            Self::Report => 12,
        }
    }

    /// Backing table name in SQL stores.
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::RedeemRequested => "redeem_requested",
            Self::RedeemClaimed => "redeem_claimed",
            Self::Report => "report",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ─── EventMeta ───────────────────────────────────────────────────────────────

/// Where an event sits on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    pub block_number: u64,
    /// Block timestamp (unix seconds).
    pub timestamp: i64,
    /// Canonical `0x` + 64 hex digit transaction hash.
    pub transaction_hash: String,
    /// Position of the event inside its block.
    pub event_index: u32,
}

// ─── Records ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemRequested {
    pub owner: String,
    pub receiver: String,
    pub shares: U256,
    /// Nominal asset amount at request time.
    pub assets: U256,
    pub redeem_id: U256,
    pub epoch: U256,
    #[serde(flatten)]
    pub meta: EventMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemClaimed {
    pub receiver: String,
    pub redeem_request_nominal: U256,
    /// Assets actually paid out.
    pub assets: U256,
    pub redeem_id: U256,
    pub epoch: U256,
    #[serde(flatten)]
    pub meta: EventMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub new_epoch: U256,
    pub new_handled_epoch_len: U256,
    pub total_supply: U256,
    pub total_assets: U256,
    pub management_fee_shares: U256,
    pub performance_fee_shares: U256,
    #[serde(flatten)]
    pub meta: EventMeta,
}

impl Report {
    /// Natural key of a report row.
    pub fn key(&self) -> (u64, u32) {
        (self.meta.block_number, self.meta.event_index)
    }
}

// ─── VaultEvent ──────────────────────────────────────────────────────────────

/// A decoded vault event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum VaultEvent {
    RedeemRequested(RedeemRequested),
    RedeemClaimed(RedeemClaimed),
    Report(Report),
}

impl VaultEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::RedeemRequested(_) => EventKind::RedeemRequested,
            Self::RedeemClaimed(_) => EventKind::RedeemClaimed,
            Self::Report(_) => EventKind::Report,
        }
    }

    pub fn meta(&self) -> &EventMeta {
        match self {
            Self::RedeemRequested(e) => &e.meta,
            Self::RedeemClaimed(e) => &e.meta,
            Self::Report(e) => &e.meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_counts_match_schemas() {
        assert_eq!(EventKind::RedeemRequested.slot_count(), 10);
        assert_eq!(EventKind::RedeemClaimed.slot_count(), 9);
        assert_eq!(EventKind::Report.slot_count(), 12);
    }

    #[test]
    fn report_key_is_block_and_index() {
        let report = Report {
            new_epoch: U256::from(3u64),
            new_handled_epoch_len: U256::from(2u64),
            total_supply: U256::ZERO,
            total_assets: U256::ZERO,
            management_fee_shares: U256::ZERO,
            performance_fee_shares: U256::ZERO,
            meta: EventMeta {
                block_number: 77,
                timestamp: 1_700_000_000,
                transaction_hash: "0x1".into(),
                event_index: 4,
            },
        };
        assert_eq!(report.key(), (77, 4));
        assert_eq!(VaultEvent::Report(report).kind(), EventKind::Report);
    }
}
