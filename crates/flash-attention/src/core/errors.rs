//! Error types emitted by the attention dispatcher and its executors.

use thiserror::Error;

/// Attention-specific error category.
///
/// Every variant is a call-time validation failure. None of them are retried
/// by this crate.
#[derive(Debug, Error)]
pub enum AttentionError {
    /// A backend was forced that this process cannot run.
    #[error("configuration error: {message}")]
    Configuration { message: String },
    /// The supplied tensor shapes do not align with the documented contract.
    #[error("invalid tensor shape: {context}")]
    InvalidShape { context: String },
    /// An incremental write would run past the end of the cache buffer.
    #[error(
        "kv cache overflow: writing {new_tokens} tokens at position {position} exceeds capacity {capacity}"
    )]
    CacheOverflow {
        position: usize,
        new_tokens: usize,
        capacity: usize,
    },
    /// The kernel does not support the requested data type.
    #[error("unsupported dtype: {requested}")]
    UnsupportedDType { requested: String },
    /// A candle failure propagated to the caller.
    #[error("backend failure: {message}")]
    Backend { message: String },
}

impl AttentionError {
    pub(crate) fn shape(context: impl Into<String>) -> Self {
        Self::InvalidShape {
            context: context.into(),
        }
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

impl From<candle_core::Error> for AttentionError {
    fn from(err: candle_core::Error) -> Self {
        Self::Backend {
            message: err.to_string(),
        }
    }
}
