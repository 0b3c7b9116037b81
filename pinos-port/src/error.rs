//! Port-transport error type, layered atop [`pinos_core::error::Error`].

use thiserror::Error;

/// Errors raised by the port transport and port graph.
#[derive(Error, Debug)]
pub enum PortError {
    /// The underlying shared error vocabulary.
    #[error(transparent)]
    Core(#[from] pinos_core::error::Error),

    /// A link was attempted between two ports of the same direction.
    #[error("ports have the same direction, cannot link")]
    DirectionMismatch,

    /// A link was attempted but one side is already at `max_peers`.
    #[error("port already has {0} peer(s), at capacity")]
    AtCapacity(usize),
}

/// Result type alias for the port transport and graph.
pub type Result<T> = std::result::Result<T, PortError>;

impl PortError {
    /// Shorthand for a protocol-layer error from the shared vocabulary.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Core(pinos_core::error::Error::protocol(msg))
    }
}
