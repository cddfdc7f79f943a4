//! Indexer configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::felt::Felt;

/// Public mainnet endpoint of the event stream.
pub const DEFAULT_STREAM_URL: &str = "wss://mainnet.starknet.a5a.ch";

/// What the consumer does with an event it recognises but cannot decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeFailurePolicy {
    /// Log, count, and continue with the rest of the block.
    #[default]
    Skip,
    /// Terminate the run.
    Abort,
}

impl FromStr for DecodeFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "abort" => Ok(Self::Abort),
            other => Err(format!("unknown decode failure policy {other:?} (expected skip|abort)")),
        }
    }
}

impl fmt::Display for DecodeFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip => write!(f, "skip"),
            Self::Abort => write!(f, "abort"),
        }
    }
}

/// Reconnect backoff settings.
///
/// `delay(attempt) = min(max_delay_ms, base_delay_ms * 2^min(attempt, cap_exponent)) + jitter`
/// with jitter drawn from `[0, max_jitter_ms)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_cap_exponent")]
    pub cap_exponent: u32,
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
    /// Transient failures tolerated before the run terminates.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_base_delay_ms() -> u64 { 1_000 }
fn default_max_delay_ms() -> u64 { 60_000 }
fn default_cap_exponent() -> u32 { 6 }
fn default_max_jitter_ms() -> u64 { 500 }
fn default_max_retries() -> u32 { 10 }
fn default_batch_size() -> usize { 100 }
fn default_stream_url() -> String { DEFAULT_STREAM_URL.into() }

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            cap_exponent: default_cap_exponent(),
            max_jitter_ms: default_max_jitter_ms(),
            max_retries: default_max_retries(),
        }
    }
}

/// Configuration for one indexer run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Vault contract whose events are indexed.
    pub vault_address: String,
    /// Event stream endpoint.
    #[serde(default = "default_stream_url")]
    pub stream_url: String,
    /// Bearer token for the stream endpoint.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Lower bound for the resume block.
    #[serde(default)]
    pub start_block: u64,
    /// Resume at `start_block` regardless of what is persisted.
    #[serde(default)]
    pub force_start_block: bool,
    /// Records per kind buffered before an early flush.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub decode_failure_policy: DecodeFailurePolicy,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            vault_address: String::new(),
            stream_url: default_stream_url(),
            auth_token: None,
            start_block: 0,
            force_start_block: false,
            batch_size: default_batch_size(),
            backoff: BackoffConfig::default(),
            decode_failure_policy: DecodeFailurePolicy::Skip,
        }
    }
}

impl IndexerConfig {
    pub fn new(vault_address: impl Into<String>) -> Self {
        Self {
            vault_address: vault_address.into(),
            ..Self::default()
        }
    }

    /// The vault address as a field element.
    pub fn vault_felt(&self) -> Result<Felt, IndexerError> {
        let felt: Felt = self
            .vault_address
            .parse()
            .map_err(|e| IndexerError::Config(format!("vault address {:?}: {e}", self.vault_address)))?;
        if !felt.is_address() {
            return Err(IndexerError::Config(format!(
                "vault address {} is outside the contract address range",
                self.vault_address
            )));
        }
        Ok(felt)
    }

    pub fn validate(&self) -> Result<(), IndexerError> {
        self.vault_felt()?;
        if self.stream_url.trim().is_empty() {
            return Err(IndexerError::Config("stream url is empty".into()));
        }
        if self.batch_size == 0 {
            return Err(IndexerError::Config("batch size must be at least 1".into()));
        }
        if self.backoff.base_delay_ms == 0 {
            return Err(IndexerError::Config("backoff base delay must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = IndexerConfig::default();
        assert_eq!(cfg.batch_size, 100);
        assert_eq!(cfg.stream_url, DEFAULT_STREAM_URL);
        assert_eq!(cfg.backoff.max_retries, 10);
        assert_eq!(cfg.backoff.cap_exponent, 6);
        assert_eq!(cfg.decode_failure_policy, DecodeFailurePolicy::Skip);
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(IndexerConfig::default().validate().is_err());

        let ok = IndexerConfig::new("0x1234");
        assert!(ok.validate().is_ok());

        let mut zero_batch = ok.clone();
        zero_batch.batch_size = 0;
        assert!(zero_batch.validate().is_err());

        let mut no_url = ok.clone();
        no_url.stream_url = " ".into();
        assert!(no_url.validate().is_err());

        let out_of_range = IndexerConfig::new(format!("0x8{}", "0".repeat(62)));
        assert!(matches!(out_of_range.validate(), Err(IndexerError::Config(_))));
    }

    #[test]
    fn policy_parses_case_insensitively() {
        assert_eq!("Skip".parse::<DecodeFailurePolicy>(), Ok(DecodeFailurePolicy::Skip));
        assert_eq!("ABORT".parse::<DecodeFailurePolicy>(), Ok(DecodeFailurePolicy::Abort));
        assert!("retry".parse::<DecodeFailurePolicy>().is_err());
    }

    #[test]
    fn deserializes_with_defaults() {
        let cfg: IndexerConfig = serde_json::from_str(r#"{"vault_address":"0xabc","start_block":42}"#).unwrap();
        assert_eq!(cfg.start_block, 42);
        assert_eq!(cfg.batch_size, 100);
        assert_eq!(cfg.backoff, BackoffConfig::default());
    }
}
