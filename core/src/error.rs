//! Error types for the engine bridge.
//!
//! # Design
//! Callers need to tell a retryable client-side give-up (`Timeout`) apart
//! from an engine-side rejection (`SubmissionFailed`, `EngineError`), and
//! both apart from local misuse (`UnknownOption`, `InvalidOptionValue`) that
//! never reaches the engine. Decoding failures from either transport layer
//! collapse into the single `Decode` kind.

use std::time::Duration;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// A malformed encoded result.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The base64 transport wrapper could not be removed.
    #[error("transport decoding failed: {0}")]
    Transport(#[from] base64::DecodeError),

    /// The MessagePack body is not an option map.
    #[error("structural decoding failed: {0}")]
    Structure(#[from] rmp_serde::decode::Error),

    /// The map decoded but a required field is missing or mistyped.
    #[error("malformed result field `{field}`: {reason}")]
    Field { field: &'static str, reason: String },
}

/// Errors surfaced by the gateway, bridge and defaults cache.
#[derive(Debug, Error)]
pub enum Error {
    /// The native engine could not be located or loaded. Not retried.
    #[error("native engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The engine returned a zero handle: the payload was rejected before
    /// admission and no request was started.
    #[error("engine rejected the payload before admission")]
    SubmissionFailed,

    /// The engine reported a failure, or returned a null/empty result.
    #[error("engine error: {0}")]
    EngineError(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("payload encoding failed: {0}")]
    Encode(String),

    /// The poll deadline passed. The handle was abandoned without being
    /// consumed, so whatever the engine holds for it may never be released.
    #[error("request {handle} timed out after {elapsed:?}; engine-side state for this handle is unknown")]
    Timeout { handle: u64, elapsed: Duration },

    #[error("unknown option `{0}`")]
    UnknownOption(String),

    #[error("invalid value for `{key}`: {reason}")]
    InvalidOptionValue { key: String, reason: String },

    /// A batch item failed; `index` is its position in the input.
    #[error("batch item {index} failed: {source}")]
    Batch {
        index: usize,
        #[source]
        source: Box<Error>,
    },

    /// A spawned task panicked or was cancelled by the runtime.
    #[error("background task failed: {0}")]
    Task(String),
}

impl Error {
    /// Whether repeating the same request may succeed. Only client-side
    /// timeouts qualify.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout { .. } => true,
            Error::Batch { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}
