//! Error types
//!
//! Each pipeline stage has its own error enum; they all fold into [`Error`].

use std::io;

use thiserror::Error;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A device bridge command (push, shell, forward) failed
    #[error("Device bridge error: {0}")]
    Bridge(String),

    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Grabber error: {0}")]
    Grabber(#[from] GrabberError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Every connection attempt to a forwarded socket failed
    #[error("Could not connect to {addr} after {attempts} attempts")]
    ConnectExhausted { addr: String, attempts: u32 },

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// A start was abandoned because the last subscriber left
    #[error("Operation cancelled")]
    Cancelled,

    /// The per-device relay task is gone
    #[error("Relay closed")]
    RelayClosed,
}

/// Capture handshake errors
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("Connection closed after {received} handshake bytes")]
    ConnectionClosed { received: usize },

    #[error("No handshake within {0:?}")]
    Timeout(std::time::Duration),
}

/// Fallback grabber errors
#[derive(Debug, Error)]
pub enum GrabberError {
    #[error("Grabber {0} exited before becoming ready")]
    Exited(&'static str),

    #[error("Grabber {0} not ready in time")]
    NotReady(&'static str),

    #[error("Invalid banner: {0}")]
    InvalidBanner(&'static str),

    #[error("Frame exceeds the {0} byte limit")]
    FrameTooLarge(usize),

    #[error("All grabbers failed ({attempted})")]
    Exhausted { attempted: String },

    #[error("Could not determine display size from {0:?}")]
    DisplaySize(String),
}

/// Bitstream and container errors
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Truncated SPS")]
    TruncatedSps,

    #[error("Invalid SPS: {0}")]
    InvalidSps(&'static str),

    #[error("Decoder configuration needs both SPS and PPS")]
    MissingParameterSets,

    #[error("Strategy {0} not configured")]
    NotConfigured(&'static str),

    #[error("Unsupported stream (first bytes {0:02x?})")]
    UnsupportedStream(Vec<u8>),

    #[error("No sink strategy available for this decoder")]
    NoStrategy,
}
