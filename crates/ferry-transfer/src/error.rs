//! Error types for ferry transfers.
//!
//! Transient loss, duplication and reordering never show up here: they are
//! absorbed by retransmission and reorder buffering. What remains are the
//! terminal outcomes a caller has to react to.

use std::io;

use thiserror::Error;

/// A datagram could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Fewer bytes than the sequence-number header.
    #[error("datagram too short: {len} bytes, need at least 4")]
    Truncated { len: usize },
}

/// Terminal outcome of a failed send.
#[derive(Debug, Error)]
pub enum SendError {
    /// A chunk exceeded its transmission budget without being acknowledged.
    #[error("chunk {seq} not acknowledged after {sends} sends")]
    DeliveryFailed { seq: u32, sends: u32 },

    /// Every chunk was acknowledged but the end-of-stream marker never was.
    /// The receiver may hold the complete file.
    #[error("end-of-stream marker {eof_seq} not acknowledged after {rounds} rounds")]
    EofHandshakeFailed { eof_seq: u32, rounds: u32 },

    /// Cancelled from outside (Ctrl+C, SIGTERM).
    #[error("transfer interrupted")]
    Interrupted,

    /// The source does not fit the 32-bit sequence space.
    #[error("source needs {chunks} chunks, more than the sequence space allows")]
    TooManyChunks { chunks: u64 },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Terminal outcome of a failed receive.
#[derive(Debug, Error)]
pub enum ReceiveError {
    /// Cancelled from outside. Any open output was flushed and closed;
    /// a partially received file is left truncated.
    #[error("receiver interrupted")]
    Interrupted,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key}={value:?} is not a valid value")]
    Unparsable { key: String, value: String },

    #[error("{key} {reason}")]
    OutOfRange { key: &'static str, reason: String },
}
