//! Error types raised at call boundaries.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::{codec::CodecError, rpc::ResponseStatus};

/// Boxed error produced by user-supplied channels and input sequences.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The reason fabricated for calls cancelled through their token.
pub(crate) const ABORT_REASON: &str = "This operation was aborted";

/// The default reason used when the owner resets the channel.
pub(crate) const RESET_REASON: &str = "reset";

/// Error raised by [`GoatTransport`](crate::GoatTransport) calls.
///
/// The variants are `Clone` because a single failure on the shared channel
/// fans out to every outstanding call, and a latched read failure is
/// reported to every call attempted before the next
/// [`reset`](crate::GoatTransport::reset).
#[derive(Clone, Debug, Error)]
pub enum TransportError {
    /// The underlying channel failed while reading or writing.
    ///
    /// When observed on the read side this error is latched: every call
    /// attempted afterwards fails with it until the channel is reset.
    #[error("channel failure: {0}")]
    Channel(Arc<BoxError>),

    /// The call was aborted, either through its cancellation token or
    /// because the owner reset the channel.
    #[error("aborted: {0}")]
    Aborted(String),

    /// The peer terminated the call with a non-zero status code.
    #[error("rpc error {code}: {message}")]
    Status {
        /// Status code reported by the peer.
        code: i32,
        /// Status message reported by the peer.
        message: String,
        /// Structured error details reported by the peer.
        details: Vec<Value>,
    },

    /// A unary response envelope carried neither body nor status.
    #[error("invalid response")]
    InvalidResponse,

    /// The input sequence of a streaming call failed, or a mid-stream write
    /// did.
    #[error("upload error: {0}")]
    Upload(String),

    /// The call's deadline elapsed before it completed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// A message failed to (de)serialize or exceeded the byte cap.
    #[error("{0}")]
    Codec(Arc<CodecError>),
}

impl TransportError {
    /// Wraps a channel failure.
    pub(crate) fn channel(err: BoxError) -> Self {
        Self::Channel(Arc::new(err))
    }

    /// The fabricated cancellation error.
    pub(crate) fn aborted() -> Self {
        Self::Aborted(ABORT_REASON.to_owned())
    }

    /// The default owner-reset error.
    pub(crate) fn reset() -> Self {
        Self::Aborted(RESET_REASON.to_owned())
    }

    /// The status code carried by this error, if the peer reported one.
    pub fn status_code(&self) -> Option<i32> {
        match self {
            Self::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<CodecError> for TransportError {
    fn from(err: CodecError) -> Self {
        Self::Codec(Arc::new(err))
    }
}

impl From<ResponseStatus> for TransportError {
    fn from(status: ResponseStatus) -> Self {
        Self::Status { code: status.code, message: status.message, details: status.details }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_preserves_causes() {
        let err = TransportError::channel("Read error".into());
        assert_eq!(err.to_string(), "channel failure: Read error");

        assert_eq!(TransportError::reset().to_string(), "aborted: reset");
        assert!(TransportError::aborted().to_string().contains(ABORT_REASON));

        let err = TransportError::from(ResponseStatus {
            code: 3,
            message: "bad argument".to_owned(),
            details: vec![],
        });
        assert_eq!(err.to_string(), "rpc error 3: bad argument");
        assert_eq!(err.status_code(), Some(3));
    }
}
