//! Field elements — the unit of every value delivered by the event stream.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Widest value a single slot may carry.
pub const FELT_BITS: usize = 252;

/// Contract addresses are strictly below `2^251`.
pub const ADDRESS_BITS: usize = 251;

/// Why a piece of text is not a field element.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeltError {
    #[error("empty value")]
    Empty,

    #[error("invalid digits in {0:?}")]
    InvalidDigits(String),

    #[error("value has {bits} bits, field elements hold at most 252")]
    Overflow { bits: usize },
}

/// An unsigned integer of at most 252 bits.
///
/// Parsed from `0x`-prefixed hex (the wire form) or plain decimal, and always
/// rendered as `0x` followed by 64 lowercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Felt(U256);

impl Felt {
    pub const ZERO: Felt = Felt(U256::ZERO);

    /// Wrap a `U256`, rejecting values wider than 252 bits.
    pub fn from_u256(value: U256) -> Result<Self, FeltError> {
        let bits = value.bit_len();
        if bits > FELT_BITS {
            return Err(FeltError::Overflow { bits });
        }
        Ok(Self(value))
    }

    pub fn from_u128(value: u128) -> Self {
        Self(U256::from(value))
    }

    pub fn from_u64(value: u64) -> Self {
        Self(U256::from(value))
    }

    /// Build from big-endian bytes; callers guarantee the 252-bit bound.
    pub(crate) fn from_be_bytes_unchecked(bytes: [u8; 32]) -> Self {
        Self(U256::from_be_bytes(bytes))
    }

    pub fn as_u256(&self) -> U256 {
        self.0
    }

    /// Number of significant bits.
    pub fn bits(&self) -> usize {
        self.0.bit_len()
    }

    /// Returns the value if it fits in 128 bits.
    pub fn to_u128(&self) -> Option<u128> {
        if self.bits() > 128 {
            return None;
        }
        let limbs = self.0.as_limbs();
        Some(u128::from(limbs[0]) | (u128::from(limbs[1]) << 64))
    }

    /// Returns `true` if the value is a valid contract address (< 2^251).
    pub fn is_address(&self) -> bool {
        self.bits() <= ADDRESS_BITS
    }

    /// Canonical `0x` + 64 hex digit rendering.
    pub fn to_fixed_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0.to_be_bytes::<32>()))
    }
}

impl FromStr for Felt {
    type Err = FeltError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(FeltError::Empty);
        }
        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some("") => return Err(FeltError::Empty),
            Some(digits) => U256::from_str_radix(digits, 16),
            None => U256::from_str_radix(s, 10),
        };
        let value = parsed.map_err(|_| FeltError::InvalidDigits(s.to_string()))?;
        Self::from_u256(value)
    }
}

impl fmt::Display for Felt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_fixed_hex())
    }
}

impl Serialize for Felt {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_fixed_hex())
    }
}

impl<'de> Deserialize<'de> for Felt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
