//! # Error Types
//!
//! Error handling for the relay protocol.
//!
//! This module defines all error variants that can occur during protocol
//! operations, from low-level I/O failures to session bookkeeping violations.
//!
//! ## Error Categories
//! - **I/O and framing errors**: transport failures, truncated or oversized frames
//! - **Cryptographic errors**: encryption/decryption failures
//! - **Protocol errors**: decrypted but malformed envelopes
//! - **Session errors**: dispatch failures, response-pool violations, lookups
//!
//! The fatal/recoverable split matters: framing and decryption errors end the
//! connection, while protocol and dispatch errors are reported in-band and the
//! connection stays open. `RelayError::is_connection_fatal` encodes that split.

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
/// Static strings are borrowed, avoiding heap allocations for common error cases.
pub mod constants {
    /// Dispatcher-related error messages
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";

    /// Framing errors
    pub const ERR_STREAM_CLOSED_MID_FRAME: &str = "Stream closed before a full frame arrived";

    /// Envelope validation errors
    pub const ERR_ENVELOPE_NOT_OBJECT: &str = "Envelope is not a JSON object";
    pub const ERR_ENVELOPE_MISSING_CONTENT: &str = "Envelope has no content sequence";
    pub const ERR_CONTENT_NOT_SEQUENCE: &str = "Envelope content is not a sequence";
    pub const ERR_EMPTY_BATCH: &str = "Envelope content holds no calls";
    pub const ERR_CALL_NOT_OBJECT: &str = "Call is not a JSON object";
    pub const ERR_CALL_UNTAGGED: &str = "Call carries neither f_name nor type";
}

/// RelayError is the primary error type for all protocol operations.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Frame too large: {0} bytes")]
    OversizedFrame(usize),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Dispatch failed: {0}")]
    Dispatch(String),

    #[error("Response pool overflow: {0}")]
    PoolOverflow(String),

    #[error("No session matched: {0}")]
    NotFound(String),

    #[error("Idle timeout elapsed")]
    IdleTimeout,

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl RelayError {
    /// Whether this error makes the byte stream untrustworthy for further
    /// reassembly. Fatal errors terminate the receive loop; everything else is
    /// absorbed and reported in-band to the peer.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            RelayError::Io(_)
                | RelayError::Framing(_)
                | RelayError::OversizedFrame(_)
                | RelayError::ConnectionClosed
                | RelayError::DecryptionFailure
        )
    }
}

/// Type alias for Results using RelayError
pub type Result<T> = std::result::Result<T, RelayError>;
