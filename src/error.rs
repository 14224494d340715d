//! Error types for the protocol engine.
//!
//! Parse failures are non-fatal by design: the dispatch loop drops the
//! offending line with a log entry and carries on. Transport errors are
//! terminal for their connection only.

use thiserror::Error;

/// Convenience type alias for Results using [`ProtocolError`].
pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

/// Top-level protocol errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// I/O error during reading or writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Line exceeded the maximum tagged-line length.
    #[error("line too long: {0} bytes")]
    LineTooLong(usize),

    /// The server name could not be used for TLS verification.
    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    /// Failed to parse an IRC message.
    #[error("invalid message: {string}")]
    InvalidMessage {
        /// The raw line.
        string: String,
        /// The underlying parse error.
        #[source]
        cause: MessageParseError,
    },
}

/// Errors encountered when parsing IRC messages.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum MessageParseError {
    /// Message was empty.
    #[error("empty message")]
    EmptyMessage,

    /// Line truncated before the command token.
    #[error("missing command")]
    MissingCommand,
}
