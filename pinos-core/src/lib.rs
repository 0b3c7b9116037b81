//! Pinos Core
//!
//! Protocol-agnostic kernel shared by the pinos client stack:
//! - Error vocabulary (`error`)
//! - Ordered property bags (`properties`)
//! - Closure-based observer registries with veto-fold semantics (`observer`)
//! - The single-threaded cooperative reactor (`reactor`)
//! - Safe `SCM_RIGHTS` fd passing (`fdpass`)
//! - Fixed-size frame staging areas (`staging`)
//! - Leaf sample-mixing arithmetic (`mixer`)

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod fdpass;
pub mod mixer;
pub mod observer;
pub mod properties;
pub mod reactor;
pub mod staging;

/// A small prelude to make downstream crates ergonomic.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::observer::{Notifier, VetoNotifier};
    pub use crate::properties::Properties;
    pub use crate::reactor::{Interest, Reactor, ReactorHandle};
}
