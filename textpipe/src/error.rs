//! Error types for the pipe and the configuration loader
//!
//! Normal operation never produces an error: writes, flushes and closes are
//! fire-and-forget, and operations after close are silently ignored. Only
//! misuse of the reader side and malformed configuration surface here.

/// Errors reported to a pipe reader
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipeError {
    /// A read was issued while another read on the same pipe was still pending.
    /// Only one outstanding reader is permitted.
    #[error("a read is already pending on pipe '{0}'")]
    ConcurrentRead(String),
}

/// Errors produced while building a [`crate::BufferConfig`]
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },

    #[error("unknown text encoding: {0}")]
    UnknownEncoding(String),
}
