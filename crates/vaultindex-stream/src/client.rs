//! The `StreamClient` abstraction the consumer drives.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

use crate::message::{BlockMessage, StatusCode, SubscriptionRequest};

/// Errors surfaced by a stream subscription.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("transport error {code}: {message}")]
    Transport { code: StatusCode, message: String },

    #[error("malformed frame: {0}")]
    Malformed(String),
}

impl StreamError {
    pub fn transport(code: StatusCode, message: impl Into<String>) -> Self {
        Self::Transport {
            code,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::transport(StatusCode::UNAVAILABLE, message)
    }

    /// Status code of the error; malformed frames count as `INTERNAL`.
    pub fn code(&self) -> StatusCode {
        match self {
            Self::Transport { code, .. } => *code,
            Self::Malformed(_) => StatusCode::INTERNAL,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.code().is_transient()
    }
}

/// A live subscription. Ends (`None`) when the server closes it cleanly.
pub type BlockStream = Pin<Box<dyn Stream<Item = Result<BlockMessage, StreamError>> + Send>>;

/// A source of block messages for one subscription request.
///
/// `subscribe` is called once per connection attempt; the consumer calls it
/// again with a new cursor after every transient failure.
#[async_trait]
pub trait StreamClient: Send + Sync {
    async fn subscribe(&self, request: SubscriptionRequest) -> Result<BlockStream, StreamError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transience_follows_the_code() {
        assert!(StreamError::unavailable("reset").is_transient());
        assert!(StreamError::Malformed("bad json".into()).is_transient());
        assert!(!StreamError::transport(StatusCode::UNAUTHENTICATED, "no token").is_transient());
    }
}
