//! # pinos-client
//!
//! Client-side core of a local media routing library: a process discovers a
//! well-known bus name, registers itself with the daemon, mirrors the roster
//! of remote objects it is allowed to see, and exchanges framed,
//! fd-carrying buffers over per-port `AF_UNIX` socketpairs.
//!
//! ## Layering
//!
//! - **`pinos-core`**: shared model — properties, the closure-based observer
//!   registries, the single-threaded `mio` reactor, `SCM_RIGHTS` fd-passing
//!   primitives, fixed staging buffers.
//! - **`pinos-port`**: the framed transport and the port graph (`Port`,
//!   `Buffer`, linking/fan-out, format negotiation).
//! - **`pinos-client`** (this crate): the `Context` handshake state machine,
//!   the abstract `Bus` collaborator, and the subscribe-roster contract that
//!   drives it.
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use pinos_client::bus::StubBus;
//! use pinos_client::context::{Context, ConnectFlags};
//! use pinos_client::pinos_core::reactor::Reactor;
//!
//! let mut reactor = Reactor::new().unwrap();
//! let ctx = Context::new("example-app", None, reactor.handle());
//! ctx.connect(Arc::new(StubBus::new()), ConnectFlags::NONE).unwrap();
//!
//! // `connect` only posts the handshake's first step; pump the reactor and
//! // poll the context until it settles.
//! for _ in 0..2 {
//!     reactor.run_once(Some(Duration::from_millis(200))).unwrap();
//!     ctx.poll();
//! }
//! assert!(matches!(ctx.state(), pinos_client::context::ContextState::Ready));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::needless_pass_by_value)]
#![deny(unsafe_code)]

pub mod bus;
pub mod config;
pub mod context;
pub mod error;
pub mod subscribe;

/// Development helpers (benches/tests/doctests)
pub mod dev_tracing;

pub use pinos_core;
pub use pinos_port;

/// A small prelude to make downstream crates ergonomic.
pub mod prelude {
    pub use crate::bus::{Bus, NameEvent, StubBus};
    pub use crate::context::{ConnectFlags, Context, ContextState};
    pub use crate::error::{ContextError, Result};
    pub use crate::subscribe::{Handle, Kind, RosterEvent, Subscribe, SubscribeState};
}
