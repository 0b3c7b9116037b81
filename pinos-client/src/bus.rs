//! The abstract bus collaborator.
//!
//! The real session-bus transport (name resolution, D-Bus method calls) is an
//! external collaborator out of scope here — this module only defines the
//! trait boundary [`Bus`] a `Context` drives, plus [`StubBus`], an in-memory
//! implementation used by tests and the crate-level doctest.

use async_trait::async_trait;

use pinos_core::properties::Properties;

use crate::error::Result;

/// A remote object path returned by the bus, e.g. `/org/pinos/client/1`.
pub type ObjectPath = String;

/// A bus name's presence, as observed by [`Bus::watch_name`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameEvent {
    /// The well-known name now has an owner.
    Appeared,
    /// The well-known name's owner went away.
    Vanished,
}

/// The session-bus operations a [`crate::context::Context`] needs.
///
/// Implementations are expected to be cheaply cloneable handles to the real
/// bus connection (an `Arc`-wrapped client, typically).
#[async_trait(?Send)]
pub trait Bus {
    /// Start watching `name`'s ownership. `auto_spawn` controls whether the
    /// bus should activate a service owner if none exists yet
    /// (`Context::NoAutoSpawn` maps to `auto_spawn = false`).
    async fn watch_name(&self, name: &str, auto_spawn: bool) -> flume::Receiver<NameEvent>;

    /// `Daemon.ConnectClient(a{sv} properties) -> (o client_path)`.
    async fn connect_client(&self, properties: &Properties) -> Result<ObjectPath>;

    /// `Client1.Disconnect() -> ()`.
    async fn disconnect_client(&self, client_path: &ObjectPath) -> Result<()>;
}

/// An in-memory [`Bus`] stub: the name appears as soon as it is watched, and
/// `connect_client` always succeeds with a fixed path. Used by tests and the
/// end-to-end connection scenarios.
#[derive(Debug, Default, Clone)]
pub struct StubBus {
    /// The path handed back from `connect_client`.
    pub client_path: ObjectPath,
}

impl StubBus {
    /// A stub bus that hands out `/c/1` as the client path.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client_path: "/c/1".to_string(),
        }
    }
}

#[async_trait(?Send)]
impl Bus for StubBus {
    async fn watch_name(&self, _name: &str, _auto_spawn: bool) -> flume::Receiver<NameEvent> {
        let (tx, rx) = flume::unbounded();
        let _ = tx.send(NameEvent::Appeared);
        rx
    }

    async fn connect_client(&self, _properties: &Properties) -> Result<ObjectPath> {
        Ok(self.client_path.clone())
    }

    async fn disconnect_client(&self, _client_path: &ObjectPath) -> Result<()> {
        Ok(())
    }
}
