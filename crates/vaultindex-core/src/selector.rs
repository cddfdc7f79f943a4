//! Event selectors and the selector → event kind routing table.

use std::collections::HashMap;

use tiny_keccak::{Hasher, Keccak};

use crate::events::EventKind;
use crate::felt::Felt;

/// Starknet Keccak: Keccak-256 truncated to its low 250 bits.
pub fn starknet_keccak(data: &[u8]) -> Felt {
    let mut hasher = Keccak::v256();
    let mut out = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut out);
    out[0] &= 0x03;
    Felt::from_be_bytes_unchecked(out)
}

/// Selector of an event, as found in `keys[0]` of every emitted event.
pub fn selector_of(event_name: &str) -> Felt {
    starknet_keccak(event_name.as_bytes())
}

/// Routes raw events to a decoder by selector.
///
/// Built explicitly and handed to the consumer, so tests can register any
/// subset of kinds.
#[derive(Debug, Clone, Default)]
pub struct SelectorTable {
    kinds: HashMap<Felt, EventKind>,
}

impl SelectorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table covering every vault event.
    pub fn vault() -> Self {
        EventKind::ALL
            .into_iter()
            .fold(Self::new(), |table, kind| table.with(kind))
    }

    /// Register `kind` under the selector of its event name.
    pub fn with(mut self, kind: EventKind) -> Self {
        self.kinds.insert(selector_of(kind.name()), kind);
        self
    }

    pub fn kind_of(&self, selector: &Felt) -> Option<EventKind> {
        self.kinds.get(selector).copied()
    }

    /// Registered selectors, ordered by event kind.
    pub fn selectors(&self) -> Vec<(EventKind, Felt)> {
        let mut out: Vec<_> = self.kinds.iter().map(|(s, k)| (*k, *s)).collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn felt(hex: &str) -> Felt {
        hex.parse().unwrap()
    }

    #[test]
    fn known_selectors() {
        assert_eq!(
            selector_of("Transfer"),
            felt("0x99cd8bde557814842a3121e8ddfd433a539b8c9f14bf31ebf108d12e6196e9")
        );
        assert_eq!(
            selector_of("RedeemRequested"),
            felt("0xfc5c8e7953c62fb357aebe6619c766f40a3e56113ec060b82286f715b6a7dc")
        );
        assert_eq!(
            selector_of("RedeemClaimed"),
            felt("0x306482a50ea1a82bc2c1d79de5baf013f58ee2260881f6b6c60d31833ef220d")
        );
        assert_eq!(
            selector_of("Report"),
            felt("0x1befad059cd346a39d300d846fc61418e94d166fc78fd6c20094f510ec76c58")
        );
    }

    #[test]
    fn selectors_fit_in_250_bits() {
        for kind in EventKind::ALL {
            assert!(selector_of(kind.name()).bits() <= 250);
        }
    }

    #[test]
    fn vault_table_routes_all_kinds() {
        let table = SelectorTable::vault();
        assert_eq!(table.len(), 3);
        for kind in EventKind::ALL {
            assert_eq!(table.kind_of(&selector_of(kind.name())), Some(kind));
        }
        assert_eq!(table.kind_of(&selector_of("Transfer")), None);
    }

    #[test]
    fn partial_table() {
        let table = SelectorTable::new().with(EventKind::Report);
        assert_eq!(table.kind_of(&selector_of("Report")), Some(EventKind::Report));
        assert_eq!(table.kind_of(&selector_of("RedeemClaimed")), None);
    }
}
