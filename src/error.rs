//! # Error Types
//!
//! Comprehensive error handling for the device communication engine.
//!
//! This module defines all error variants that can occur while talking to
//! (or emulating) a controller, from low-level I/O failures to control-channel
//! protocol violations and register addressing mistakes.
//!
//! ## Error Categories
//! - **Transport**: connect/send/receive failures and remote close
//! - **Timeout**: a watchdog deadline elapsed before the operation finished
//! - **Protocol**: token mismatch, length-echo mismatch, malformed frames
//! - **Bounds**: register address/width problems caught before any I/O
//! - **Account**: credential rejection on gated servers
//!
//! Expected failures are always returned as values; the engine never uses
//! panics for a failure path. On any transport, timeout or protocol error the
//! underlying socket is closed before the error is surfaced, so callers never
//! need to close twice.
//!
//! All errors implement `std::error::Error` for interoperability.

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
/// Static strings are borrowed, avoiding heap allocations for common error cases.
pub mod constants {
    /// Dispatcher-related error messages
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";
    pub const ERR_UNKNOWN_COMMAND: &str = "No handler registered for command";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed by remote";
    pub const ERR_TIMEOUT: &str = "Operation deadline exceeded";
    pub const ERR_NOT_CONNECTED: &str = "Client is not connected";

    /// Control-channel errors
    pub const ERR_TOKEN_MISMATCH: &str = "Handshake token mismatch";
    pub const ERR_SHORT_HEADER: &str = "Header shorter than the fixed control layout";
    pub const ERR_CONTENT_TOO_LARGE: &str = "Resolved content length exceeds the frame limit";
    pub const ERR_TRUNCATED_STRINGS: &str = "String array payload is truncated";

    /// Account gate errors
    pub const ERR_ACCOUNT_UNKNOWN: &str = "Account name is not registered";
    pub const ERR_ACCOUNT_PASSWORD: &str = "Account password does not match";
    pub const ERR_ACCOUNT_EXPECTED: &str = "Expected an account exchange before normal traffic";
}

/// Primary error type for all engine operations.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed by remote")]
    ConnectionClosed,

    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Operation deadline exceeded")]
    Timeout,

    #[error("Handshake token mismatch")]
    TokenMismatch,

    #[error("Length echo mismatch: sent {sent} bytes, remote confirmed {echoed}")]
    EchoMismatch { sent: u64, echoed: u64 },

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Address overflow: {count} elements of {width} bytes at unit {address}")]
    AddressOverflow { address: u32, count: u32, width: usize },

    #[error("Unsupported element width: {0} bytes")]
    UnsupportedWidth(usize),

    #[error("Snapshot too short: need {need} bytes, got {got}")]
    SnapshotTooShort { need: usize, got: usize },

    #[error("Account rejected: {0}")]
    AuthFailed(String),

    #[error("Remote reported failure: {0}")]
    Remote(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

/// Type alias for Results using LinkError
pub type Result<T> = std::result::Result<T, LinkError>;

impl LinkError {
    /// Whether this error indicates the peer went away (as opposed to a local
    /// or protocol-level failure). Used by session teardown to pick a log level.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, LinkError::ConnectionClosed | LinkError::Io(_))
    }
}
