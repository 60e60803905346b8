//! Transport error types.

use thiserror::Error;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors that can occur in transport operations.
///
/// All of these end the current connection cycle; none of them is fatal to
/// the bridge process. The supervisor maps every variant to
/// backoff-and-retry.
#[derive(Debug, Error)]
pub enum TransportError {
    /// WebSocket establishment or mid-session failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// The handler process could not be launched.
    #[error("failed to spawn handler process: {0}")]
    Spawn(String),

    /// A read or write failed mid-cycle on one of the relayed streams.
    #[error("relay error: {0}")]
    Relay(String),

    /// The remote endpoint stopped answering liveness probes.
    #[error("liveness probe timed out")]
    ProbeTimeout,

    /// A binary frame did not decode as UTF-8 text.
    #[error("received frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// I/O error on a process stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
