//! Context-level error type, layered atop [`pinos_port::error::PortError`].

use thiserror::Error;

/// Errors raised by [`crate::context::Context`] and the bus/subscribe layers.
#[derive(Error, Debug)]
pub enum ContextError {
    /// The underlying shared error vocabulary.
    #[error(transparent)]
    Core(#[from] pinos_core::error::Error),

    /// `connect` was called while already connected (or connecting).
    #[error("already connected")]
    AlreadyConnected,

    /// `disconnect` was called while already disconnecting.
    #[error("already disconnecting")]
    AlreadyDisconnecting,
}

/// Result type alias for the `pinos-client` crate.
pub type Result<T> = std::result::Result<T, ContextError>;
