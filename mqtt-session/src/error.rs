//! Client-facing error taxonomy.
//!
//! Internal plumbing (`io::Error`, `mqtt_wire::DecodeError`) is captured via
//! `#[from]` but never leaks past the client facade: callers only ever see a
//! [`ClientError`] variant.

use mqtt_wire::{ConnectReturnCode, DecodeError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("protocol error: {0}")]
    Protocol(#[from] DecodeError),

    #[error("connection refused: {0}")]
    ConnectRefused(ConnectReturnCode),

    #[error("operation timed out")]
    TimedOut,

    #[error("session is disconnected")]
    Disconnected,

    #[error("operation was cancelled")]
    Cancelled,

    #[error("outbound queue is full")]
    BackpressureFull,

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        log::debug!("transport io error: {}", err);
        ClientError::Disconnected
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
