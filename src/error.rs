//! Error types for the sender and gateway nodes
//!
//! Only initialization failures are allowed to end a node. Everything here
//! that surfaces from a periodic cycle is logged by the caller and the cycle
//! is abandoned.

use thiserror::Error;

use crate::domain::SenderId;
use crate::radio::MacAddr;

/// Fixed-layout payload decoding/encoding failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Payload size matches neither accepted layout
    #[error("bad payload length: {got} bytes (expected {expected})")]
    Length { got: usize, expected: &'static str },

    /// Command text has no NUL inside the fixed buffer
    #[error("command payload is not NUL-terminated")]
    Unterminated,

    /// Command text is not UTF-8
    #[error("command payload is not valid UTF-8")]
    Utf8,

    /// Command text does not fit the fixed buffer
    #[error("command too long: {len} bytes (max {max})")]
    CommandTooLong { len: usize, max: usize },

    /// Radio frame shorter than its address header
    #[error("radio frame truncated: {0} bytes")]
    Truncated(usize),
}

/// Wireless link failures
#[derive(Error, Debug)]
pub enum RadioError {
    /// Radio could not be brought up; fatal for the node
    #[error("radio init failed: {0}")]
    Init(String),

    /// Send/receive failed at the socket level
    #[error("radio i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// No route configured for this hardware address
    #[error("no peer configured for {0}")]
    UnknownPeer(MacAddr),

    /// The medium has gone away
    #[error("radio closed")]
    Closed,
}

/// Backend HTTP failures
#[derive(Error, Debug)]
pub enum BackendError {
    /// Connection, DNS, timeout or body read failure
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Response code outside what the endpoint contract allows
    #[error("unexpected status {0}")]
    Status(u16),

    /// Response body did not parse
    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Configuration rejected by `NodeConfig::validate`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("sender role requires node.sender_id")]
    MissingSenderId,

    #[error("invalid sender id {0} (must be positive)")]
    InvalidSenderId(SenderId),

    #[error("duplicate station id {0} in gateway.stations")]
    DuplicateStation(SenderId),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    /// Calibration constant that would make a reading NaN or infinite
    #[error("{0} must be a finite number")]
    NotFinite(&'static str),

    #[error("unknown role {0:?} (expected \"sender\" or \"gateway\")")]
    UnknownRole(String),
}
