//! Positional decoding of vault event data arrays.
//!
//! Every event's `data` is a flat array of field elements. Addresses take one
//! slot; a `u256` takes two, low half first: `value = low | (high << 128)`.
//!
//! | Event           | Layout                                                      | Slots |
//! |-----------------|-------------------------------------------------------------|-------|
//! | RedeemRequested | owner, receiver, shares, assets, redeem_id, epoch           | 10    |
//! | RedeemClaimed   | receiver, redeem_request_nominal, assets, redeem_id, epoch  | 9     |
//! | Report          | new_epoch, new_handled_epoch_len, total_supply,             | 12    |
//! |                 | total_assets, management_fee_shares, performance_fee_shares |       |
//!
//! Decoding is pure: no I/O, no state. Arrays shorter than the layout are
//! rejected; trailing slots are ignored.

use alloy_primitives::U256;

use crate::error::DecodeError;
use crate::events::{EventKind, EventMeta, RedeemClaimed, RedeemRequested, Report, VaultEvent};
use crate::felt::Felt;

/// Decode `data` as an event of `kind`.
pub fn decode<S: AsRef<str>>(
    kind: EventKind,
    meta: EventMeta,
    data: &[S],
) -> Result<VaultEvent, DecodeError> {
    Ok(match kind {
        EventKind::RedeemRequested => VaultEvent::RedeemRequested(decode_redeem_requested(meta, data)?),
        EventKind::RedeemClaimed => VaultEvent::RedeemClaimed(decode_redeem_claimed(meta, data)?),
        EventKind::Report => VaultEvent::Report(decode_report(meta, data)?),
    })
}

pub fn decode_redeem_requested<S: AsRef<str>>(
    meta: EventMeta,
    data: &[S],
) -> Result<RedeemRequested, DecodeError> {
    let mut slots = Slots::new(EventKind::RedeemRequested, data)?;
    Ok(RedeemRequested {
        owner: slots.address()?,
        receiver: slots.address()?,
        shares: slots.u256()?,
        assets: slots.u256()?,
        redeem_id: slots.u256()?,
        epoch: slots.u256()?,
        meta,
    })
}

pub fn decode_redeem_claimed<S: AsRef<str>>(
    meta: EventMeta,
    data: &[S],
) -> Result<RedeemClaimed, DecodeError> {
    let mut slots = Slots::new(EventKind::RedeemClaimed, data)?;
    Ok(RedeemClaimed {
        receiver: slots.address()?,
        redeem_request_nominal: slots.u256()?,
        assets: slots.u256()?,
        redeem_id: slots.u256()?,
        epoch: slots.u256()?,
        meta,
    })
}

pub fn decode_report<S: AsRef<str>>(meta: EventMeta, data: &[S]) -> Result<Report, DecodeError> {
    let mut slots = Slots::new(EventKind::Report, data)?;
    Ok(Report {
        new_epoch: slots.u256()?,
        new_handled_epoch_len: slots.u256()?,
        total_supply: slots.u256()?,
        total_assets: slots.u256()?,
        management_fee_shares: slots.u256()?,
        performance_fee_shares: slots.u256()?,
        meta,
    })
}

/// Join two 128-bit halves into a `u256`.
pub fn join_u256(low: u128, high: u128) -> U256 {
    U256::from(low) | (U256::from(high) << 128usize)
}

/// Split a `u256` into its `(low, high)` halves, the order they appear on the wire.
pub fn split_u256(value: U256) -> (u128, u128) {
    let limbs = value.as_limbs();
    let low = u128::from(limbs[0]) | (u128::from(limbs[1]) << 64);
    let high = u128::from(limbs[2]) | (u128::from(limbs[3]) << 64);
    (low, high)
}

/// Cursor over a data array whose length has already been checked.
struct Slots<'a, S> {
    data: &'a [S],
    pos: usize,
}

impl<'a, S: AsRef<str>> Slots<'a, S> {
    fn new(kind: EventKind, data: &'a [S]) -> Result<Self, DecodeError> {
        let expected = kind.slot_count();
        if data.len() < expected {
            return Err(DecodeError::TooShort {
                kind,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { data, pos: 0 })
    }

    fn felt(&mut self) -> Result<(usize, Felt), DecodeError> {
        let index = self.pos;
        self.pos += 1;
        let felt = self.data[index]
            .as_ref()
            .parse::<Felt>()
            .map_err(|source| DecodeError::InvalidFelt { index, source })?;
        Ok((index, felt))
    }

    fn half(&mut self) -> Result<u128, DecodeError> {
        let (index, felt) = self.felt()?;
        felt.to_u128().ok_or(DecodeError::U256HalfOverflow { index })
    }

    fn u256(&mut self) -> Result<U256, DecodeError> {
        let low = self.half()?;
        let high = self.half()?;
        Ok(join_u256(low, high))
    }

    fn address(&mut self) -> Result<String, DecodeError> {
        let (index, felt) = self.felt()?;
        if !felt.is_address() {
            return Err(DecodeError::InvalidAddress {
                index,
                value: felt.to_fixed_hex(),
            });
        }
        Ok(felt.to_fixed_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::felt::FeltError;

    fn meta() -> EventMeta {
        EventMeta {
            block_number: 812_345,
            timestamp: 1_718_000_000,
            transaction_hash: format!("0x{}", "ab".repeat(32)),
            event_index: 2,
        }
    }

    fn hex(v: u128) -> String {
        format!("0x{v:x}")
    }

    fn u256_slots(low: u128, high: u128) -> [String; 2] {
        [hex(low), hex(high)]
    }

    fn redeem_requested_data() -> Vec<String> {
        let mut data = vec!["0x1234".to_string(), "0x5678".to_string()];
        data.extend(u256_slots(1_000, 0)); // shares
        data.extend(u256_slots(2_000, 1)); // assets
        data.extend(u256_slots(7, 0)); // redeem_id
        data.extend(u256_slots(3, 0)); // epoch
        data
    }

    #[test]
    fn u256_halves_join_low_first() {
        let pairs = [
            (0u128, 0u128),
            (1, 0),
            (0, 1),
            (u128::MAX, 0),
            (0, u128::MAX),
            (u128::MAX, u128::MAX),
            (0xdead_beef, 0x1234_5678_9abc_def0),
        ];
        for (low, high) in pairs {
            let mut data = vec!["0x0".to_string(); 12];
            data[0] = hex(low);
            data[1] = hex(high);
            let report = decode_report(meta(), &data).unwrap();
            assert_eq!(report.new_epoch, join_u256(low, high));
            assert_eq!(split_u256(report.new_epoch), (low, high));
        }
    }

    #[test]
    fn join_matches_shift_or() {
        let v = join_u256(5, 2);
        assert_eq!(v, U256::from(5u64) + (U256::from(2u64) << 128usize));
    }

    #[test]
    fn decodes_redeem_requested() {
        let event = decode(EventKind::RedeemRequested, meta(), &redeem_requested_data()).unwrap();
        let VaultEvent::RedeemRequested(r) = event else {
            panic!("wrong variant");
        };
        assert_eq!(r.owner, format!("0x{:0>64}", "1234"));
        assert_eq!(r.receiver, format!("0x{:0>64}", "5678"));
        assert_eq!(r.shares, U256::from(1_000u64));
        assert_eq!(r.assets, join_u256(2_000, 1));
        assert_eq!(r.redeem_id, U256::from(7u64));
        assert_eq!(r.epoch, U256::from(3u64));
        assert_eq!(r.meta, meta());
    }

    #[test]
    fn decodes_redeem_claimed() {
        let mut data = vec!["0x99".to_string()];
        data.extend(u256_slots(500, 0));
        data.extend(u256_slots(495, 0));
        data.extend(u256_slots(7, 0));
        data.extend(u256_slots(3, 0));
        let claimed = decode_redeem_claimed(meta(), &data).unwrap();
        assert_eq!(claimed.receiver, format!("0x{:0>64}", "99"));
        assert_eq!(claimed.redeem_request_nominal, U256::from(500u64));
        assert_eq!(claimed.assets, U256::from(495u64));
        assert_eq!(claimed.redeem_id, U256::from(7u64));
    }

    #[test]
    fn decodes_report_in_order() {
        let data: Vec<String> = (1..=6u128).flat_map(|i| u256_slots(i * 10, 0)).collect();
        let report = decode_report(meta(), &data).unwrap();
        assert_eq!(report.new_epoch, U256::from(10u64));
        assert_eq!(report.new_handled_epoch_len, U256::from(20u64));
        assert_eq!(report.total_supply, U256::from(30u64));
        assert_eq!(report.total_assets, U256::from(40u64));
        assert_eq!(report.management_fee_shares, U256::from(50u64));
        assert_eq!(report.performance_fee_shares, U256::from(60u64));
    }

    #[test]
    fn one_slot_short_is_rejected() {
        let mut data = redeem_requested_data();
        data.pop();
        assert_eq!(data.len(), 9);
        let err = decode(EventKind::RedeemRequested, meta(), &data).unwrap_err();
        assert_eq!(
            err,
            DecodeError::TooShort {
                kind: EventKind::RedeemRequested,
                expected: 10,
                actual: 9,
            }
        );
    }

    #[test]
    fn trailing_slots_are_ignored() {
        let mut data = redeem_requested_data();
        data.push("0xffff".into());
        assert!(decode(EventKind::RedeemRequested, meta(), &data).is_ok());
    }

    #[test]
    fn invalid_felt_reports_slot() {
        let mut data = redeem_requested_data();
        data[4] = "0xnothex".into();
        let err = decode(EventKind::RedeemRequested, meta(), &data).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::InvalidFelt {
                index: 4,
                source: FeltError::InvalidDigits(_)
            }
        ));
    }

    #[test]
    fn oversized_u256_half_is_rejected() {
        let mut data = redeem_requested_data();
        data[2] = format!("0x1{}", "0".repeat(32)); // 2^128
        let err = decode(EventKind::RedeemRequested, meta(), &data).unwrap_err();
        assert_eq!(err, DecodeError::U256HalfOverflow { index: 2 });
    }

    #[test]
    fn owner_outside_address_range_is_rejected() {
        let mut data = redeem_requested_data();
        data[0] = format!("0x8{}", "0".repeat(62)); // 2^251
        let err = decode(EventKind::RedeemRequested, meta(), &data).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidAddress { index: 0, .. }));
    }

    #[test]
    fn decoding_is_deterministic() {
        let data = redeem_requested_data();
        let a = decode(EventKind::RedeemRequested, meta(), &data).unwrap();
        let b = decode(EventKind::RedeemRequested, meta(), &data).unwrap();
        assert_eq!(a, b);
    }
}
