//! Shared error type for the pinos client stack.
//!
//! Every layer (`pinos-core`, `pinos-port`, `pinos-client`) reports failures through
//! this single enum so that a `Context`'s `last_error` and a `Port`'s transport
//! failures share one vocabulary.

use std::io;
use thiserror::Error;

/// Errors surfaced by the pinos client core.
#[derive(Error, Debug)]
pub enum Error {
    /// The bus connection (or the daemon's name on it) went away.
    #[error("connection closed")]
    ConnectionClosed,

    /// The context's own client object disappeared from the daemon's roster.
    #[error("client disappeared")]
    ClientDisappeared,

    /// A caller-supplied argument failed validation (e.g. an unparsable format filter).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A lookup produced no result (e.g. an empty format intersection).
    #[error("not found")]
    NotFound,

    /// The operation could not proceed because a resource is already in use.
    #[error("busy")]
    Busy,

    /// A low-level I/O failure during `sendmsg`/`recvmsg`.
    #[error("io error: {0}")]
    IoError(#[from] io::Error),

    /// A malformed frame: short read, bad header, or unparsable control packet.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// An observer vetoed the operation (e.g. `linked` returned `false`).
    #[error("operation vetoed")]
    Vetoed,
}

/// Result type alias used throughout the pinos client crates.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Build an [`Error::InvalidArgument`] from any displayable message.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Build an [`Error::ProtocolError`] from any displayable message.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolError(msg.into())
    }

    /// Whether retrying the same operation could plausibly succeed.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            Self::Busy => true,
            _ => false,
        }
    }

    /// Whether this error reflects the remote end going away, as opposed to a
    /// purely local/programmer error.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(self, Self::ConnectionClosed | Self::ClientDisappeared)
    }
}
