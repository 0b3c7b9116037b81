//! Pinos Port
//!
//! Framed, fd-passing port transport and port graph (see `pinos-client` for the
//! public, bus-aware API built on top of this crate):
//! - Wire framing (`header`, `buffer`)
//! - Control-packet parsing (`control`)
//! - Pluggable format negotiation (`format`)
//! - `AF_UNIX` socketpair construction (`socketpair`)
//! - The `Port` graph itself: linking, fan-out, reactor integration (`port`)

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod buffer;
pub mod control;
pub mod error;
pub mod format;
pub mod header;
pub mod port;
pub mod socketpair;

/// A small prelude to make downstream crates ergonomic.
pub mod prelude {
    pub use crate::buffer::Buffer;
    pub use crate::error::{PortError, Result};
    pub use crate::format::{FormatAlgebra, MimeFormat};
    pub use crate::port::{Direction, Port};
}
