//! Context lifecycle state machine.
//!
//! A `Context` discovers a well-known bus name, drives a register→ready
//! handshake against it, mirrors the remote roster via [`crate::subscribe`],
//! and reports failures through a sticky `Error` state. Like
//! [`pinos_port::port::Port`], a `Context` is bound to one reactor at
//! construction: its cross-thread entry points (`connect`, `disconnect`, the
//! name/roster event handlers) only *post* the bus call they need onto that
//! reactor and return immediately, same as `Port::close`. The actual state
//! mutation — which is `Rc`-based and not `Send` — only ever happens inside
//! [`Context::poll`], which must be called from the reactor's own thread once
//! a posted task has run.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, warn};

use pinos_core::error::Error as CoreError;
use pinos_core::observer::Notifier;
use pinos_core::properties::Properties;
use pinos_core::reactor::ReactorHandle;

use crate::bus::{Bus, NameEvent, ObjectPath};
use crate::config;
use crate::error::{ContextError, Result};
use crate::subscribe::{Handle, Kind, RosterEvent, Subscribe, SubscribeState};

/// The context's connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Unconnected,
    Connecting,
    Registering,
    Ready,
    Error,
}

/// Flags accepted by [`Context::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectFlags(u8);

impl ConnectFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Do not request auto-start of the bus-name owner.
    pub const NO_AUTO_SPAWN: Self = Self(1 << 0);
    /// On name-vanish, remain in `Connecting` rather than moving to `Error`.
    pub const NO_FAIL: Self = Self(1 << 1);

    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ConnectFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// The result of one posted reactor task, applied by [`Context::poll`].
///
/// Carries only `Send` data — no `Rc`-based state — since it crosses from the
/// reactor-posted closure back to whichever thread calls `poll`.
enum Outcome {
    NameAppeared,
    NameVanished,
    ClientConnected(ObjectPath),
    ClientConnectFailed(ContextError),
    Disconnected,
}

struct Inner<B: Bus> {
    name: String,
    properties: Properties,
    state: ContextState,
    last_error: Option<Rc<ContextError>>,
    flags: ConnectFlags,
    subscription_mask: HashSet<Kind>,
    bus: Option<Arc<B>>,
    reactor: ReactorHandle,
    outcome_tx: flume::Sender<Outcome>,
    outcome_rx: flume::Receiver<Outcome>,
    subscribe: Subscribe,
    daemon: Option<Handle>,
    client: Option<Handle>,
    clients: Vec<Handle>,
    sources: Vec<Handle>,
    sinks: Vec<Handle>,
    channels: Vec<Handle>,
    disconnecting: bool,
    state_notify: Notifier<ContextState>,
    subscription_event: Notifier<(Kind, RosterEvent, Handle)>,
    property_changed: Notifier<String>,
}

/// The client-side handshake and roster-mirroring state machine.
pub struct Context<B: Bus> {
    inner: Rc<RefCell<Inner<B>>>,
}

// `#[derive(Clone)]` would add an unneeded `B: Clone` bound — only `Arc<B>` is
// ever stored, never `B` itself.
impl<B: Bus> Clone for Context<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B: Bus + Send + Sync + 'static> Context<B> {
    /// A fresh `Unconnected` context bound to `reactor`. If `properties` is
    /// absent, a bag containing only `application.name: name` is created.
    #[must_use]
    pub fn new(name: impl Into<String>, properties: Option<Properties>, reactor: ReactorHandle) -> Self {
        let name = name.into();
        let mut properties = properties.unwrap_or_default();
        if properties.get("application.name").is_none() {
            properties.set("application.name", name.clone());
        }
        let (outcome_tx, outcome_rx) = flume::unbounded();
        Self {
            inner: Rc::new(RefCell::new(Inner {
                name,
                properties,
                state: ContextState::Unconnected,
                last_error: None,
                flags: ConnectFlags::NONE,
                subscription_mask: HashSet::new(),
                bus: None,
                reactor,
                outcome_tx,
                outcome_rx,
                subscribe: Subscribe::new(),
                daemon: None,
                client: None,
                clients: Vec::new(),
                sources: Vec::new(),
                sinks: Vec::new(),
                channels: Vec::new(),
                disconnecting: false,
                state_notify: Notifier::new(),
                subscription_event: Notifier::new(),
                property_changed: Notifier::new(),
            })),
        }
    }

    /// The context's current state.
    #[must_use]
    pub fn state(&self) -> ContextState {
        self.inner.borrow().state
    }

    /// The cause of the most recent `Error` state, if any.
    #[must_use]
    pub fn error(&self) -> Option<Rc<ContextError>> {
        self.inner.borrow().last_error.clone()
    }

    /// The application-supplied properties, including `application.name`.
    #[must_use]
    pub fn properties(&self) -> Properties {
        self.inner.borrow().properties.clone()
    }

    /// Restrict which roster kinds produce a `subscription-event`.
    pub fn set_subscription_mask(&self, mask: HashSet<Kind>) {
        self.inner.borrow_mut().subscription_mask = mask;
        self.notify_property("subscription-mask");
    }

    /// Register a handler for property-change notifications, fired with the
    /// changed property's key (`"state"`, `"connection"`, `"name"`,
    /// `"properties"`, or `"subscription-mask"`).
    pub fn on_property_changed(&self, handler: impl FnMut(&String) + 'static) {
        self.inner.borrow_mut().property_changed.subscribe(handler);
    }

    fn notify_property(&self, key: &str) {
        self.inner
            .borrow_mut()
            .property_changed
            .notify(&key.to_string());
    }

    /// Register a handler for every state transition.
    pub fn on_state_change(&self, handler: impl FnMut(&ContextState) + 'static) {
        self.inner.borrow_mut().state_notify.subscribe(handler);
    }

    /// Register a handler for `subscription-event(kind, event, handle)`, fired
    /// only for kinds present in the subscription mask.
    pub fn on_subscription_event(
        &self,
        handler: impl FnMut(&(Kind, RosterEvent, Handle)) + 'static,
    ) {
        self.inner.borrow_mut().subscription_event.subscribe(handler);
    }

    /// Drain every reactor-task outcome that has arrived since the last call
    /// and apply its effect to this context's state. Must be called from the
    /// thread that owns the bound reactor, typically right after a
    /// `run_once`/`run_until` cycle that could have run a posted task.
    pub fn poll(&self) {
        loop {
            let outcome = {
                let inner = self.inner.borrow();
                inner.outcome_rx.try_recv()
            };
            match outcome {
                Ok(outcome) => self.apply_outcome(outcome),
                Err(_) => break,
            }
        }
    }

    /// Begin the handshake: post a task that watches the bus name; the
    /// rest of the handshake (register once the roster reaches `Ready`)
    /// continues from [`Context::poll`] as outcomes arrive. Returns
    /// immediately — failures are reported through the `Error` state, not
    /// through this call's return value. Precondition: not already connected
    /// or connecting.
    pub fn connect(&self, bus: Arc<B>, flags: ConnectFlags) -> Result<()> {
        if self.inner.borrow().state != ContextState::Unconnected {
            return Err(ContextError::AlreadyConnected);
        }
        {
            let mut inner = self.inner.borrow_mut();
            inner.flags = flags;
            inner.bus = Some(bus.clone());
            inner.last_error = None;
            inner.disconnecting = false;
        }
        self.notify_property("connection");
        self.set_state(ContextState::Connecting);

        let auto_spawn = !flags.contains(ConnectFlags::NO_AUTO_SPAWN);
        self.post_watch_name(bus, auto_spawn);
        Ok(())
    }

    /// Post a task that watches the bus name and reports the outcome back
    /// through the outcome channel.
    fn post_watch_name(&self, bus: Arc<B>, auto_spawn: bool) {
        let (reactor, tx) = {
            let inner = self.inner.borrow();
            (inner.reactor.clone(), inner.outcome_tx.clone())
        };
        let bus_name = config::bus_name();
        reactor.post(move |_reactor| {
            let name_events = futures::executor::block_on(bus.watch_name(&bus_name, auto_spawn));
            let outcome = match name_events.recv() {
                Ok(NameEvent::Appeared) => Outcome::NameAppeared,
                Ok(NameEvent::Vanished) | Err(_) => Outcome::NameVanished,
            };
            let _ = tx.send(outcome);
        });
    }

    /// Post a task that issues `ConnectClient` and reports the outcome back
    /// through the outcome channel.
    fn post_connect_client(&self, bus: Arc<B>) {
        let (reactor, tx, properties) = {
            let inner = self.inner.borrow();
            (
                inner.reactor.clone(),
                inner.outcome_tx.clone(),
                inner.properties.clone(),
            )
        };
        reactor.post(move |_reactor| {
            let outcome = match futures::executor::block_on(bus.connect_client(&properties)) {
                Ok(path) => Outcome::ClientConnected(path),
                Err(err) => Outcome::ClientConnectFailed(err),
            };
            let _ = tx.send(outcome);
        });
    }

    /// Post a task that issues `Client1.Disconnect` and reports completion
    /// back through the outcome channel (a failed RPC is only logged — the
    /// local teardown proceeds either way).
    fn post_disconnect_client(&self, bus: Arc<B>, client_path: ObjectPath) {
        let (reactor, tx) = {
            let inner = self.inner.borrow();
            (inner.reactor.clone(), inner.outcome_tx.clone())
        };
        reactor.post(move |_reactor| {
            if let Err(err) = futures::executor::block_on(bus.disconnect_client(&client_path)) {
                warn!(%err, "Client1.Disconnect failed during teardown");
            }
            let _ = tx.send(Outcome::Disconnected);
        });
    }

    /// Apply one outcome of a posted reactor task. Runs entirely on the
    /// caller's thread via the `Rc`-based state, so this must only ever be
    /// reached through [`Context::poll`].
    fn apply_outcome(&self, outcome: Outcome) {
        match outcome {
            Outcome::NameAppeared => {
                debug!(bus_name = %config::bus_name(), "bus name appeared");
                // A real bus transport feeds the roster asynchronously as
                // object-manager signals arrive; this applies the one delta a
                // well-behaved daemon emits immediately (the Daemon handle
                // itself) to drive Connecting -> Registering.
                self.apply_roster_delta(Kind::Daemon, RosterEvent::New, "/daemon");
                let ready = self.inner.borrow().subscribe.state() == SubscribeState::Ready;
                if ready {
                    if let Some(bus) = self.inner.borrow().bus.clone() {
                        self.set_state(ContextState::Registering);
                        self.post_connect_client(bus);
                    }
                }
            }
            Outcome::NameVanished => {
                self.fail(CoreError::ConnectionClosed.into());
            }
            Outcome::ClientConnected(client_path) => {
                self.apply_roster_delta(Kind::Client, RosterEvent::New, client_path.clone());
                {
                    let mut inner = self.inner.borrow_mut();
                    inner.client = Some(Handle {
                        kind: Kind::Client,
                        path: client_path,
                    });
                    inner.daemon = inner.subscribe.get(Kind::Daemon, "/daemon").cloned();
                }
                self.set_state(ContextState::Ready);
            }
            Outcome::ClientConnectFailed(err) => {
                self.fail(err);
            }
            Outcome::Disconnected => {
                {
                    let mut inner = self.inner.borrow_mut();
                    inner.client = None;
                    inner.daemon = None;
                    inner.bus = None;
                    inner.disconnecting = false;
                }
                self.notify_property("connection");
                self.set_state(ContextState::Unconnected);
            }
        }
    }

    /// Tear down an established (or in-progress) connection, returning to
    /// `Unconnected`. If no client is registered yet, this completes
    /// synchronously; otherwise it posts the `Disconnect` RPC and completes
    /// from [`Context::poll`]. Precondition: not already disconnecting.
    pub fn disconnect(&self) -> Result<()> {
        if self.inner.borrow().disconnecting {
            return Err(ContextError::AlreadyDisconnecting);
        }
        let client = self.inner.borrow().client.clone();
        let Some(client) = client else {
            self.set_state(ContextState::Unconnected);
            return Ok(());
        };

        self.inner.borrow_mut().disconnecting = true;
        match self.inner.borrow().bus.clone() {
            Some(bus) => self.post_disconnect_client(bus, client.path),
            None => self.apply_outcome(Outcome::Disconnected),
        }
        Ok(())
    }

    /// Apply a bus-name vanish event: recover to `Connecting` under
    /// `NoFail`, otherwise fail with `ConnectionClosed`.
    pub fn handle_name_vanished(&self) {
        let (no_fail, bus, disconnecting) = {
            let inner = self.inner.borrow();
            (
                inner.flags.contains(ConnectFlags::NO_FAIL),
                inner.bus.clone(),
                inner.disconnecting,
            )
        };
        if disconnecting {
            return;
        }
        if !no_fail {
            self.fail(CoreError::ConnectionClosed.into());
            return;
        }
        self.set_state(ContextState::Connecting);
        if let Some(bus) = bus {
            self.set_state(ContextState::Registering);
            self.post_connect_client(bus);
        }
    }

    /// Apply a roster delta for the own `Client` handle's removal: fails with
    /// `ClientDisappeared` unless an orderly `disconnect` is already underway.
    pub fn handle_client_removed(&self, path: &str) {
        let (is_own_client, disconnecting) = {
            let inner = self.inner.borrow();
            (
                inner.client.as_ref().is_some_and(|h| h.path == path),
                inner.disconnecting,
            )
        };
        if is_own_client && !disconnecting {
            self.fail(CoreError::ClientDisappeared.into());
        }
    }

    /// Feed one roster delta into the subscribe-roster and the matching
    /// per-kind list, emitting `subscription-event` if `kind` is in the mask.
    pub fn apply_roster_delta(&self, kind: Kind, event: RosterEvent, path: impl Into<String>) {
        let path = path.into();
        let handle = {
            let mut inner = self.inner.borrow_mut();
            inner.subscribe.apply(kind, event, path.clone());
            let handle = Handle { kind, path };
            let list = match kind {
                Kind::Daemon | Kind::Client => None,
                Kind::Source => Some(&mut inner.sources),
                Kind::Sink => Some(&mut inner.sinks),
                Kind::Channel => Some(&mut inner.channels),
            };
            if let Some(list) = list {
                match event {
                    RosterEvent::New => list.push(handle.clone()),
                    RosterEvent::Change => {
                        if let Some(slot) = list.iter_mut().find(|h| h.path == handle.path) {
                            *slot = handle.clone();
                        }
                    }
                    RosterEvent::Remove => list.retain(|h| h.path != handle.path),
                }
            }
            if kind == Kind::Client && matches!(event, RosterEvent::New) {
                // own client handle tracked separately via `client`, mirrored here too
                inner.clients.push(handle.clone());
            } else if kind == Kind::Client && matches!(event, RosterEvent::Remove) {
                inner.clients.retain(|h| h.path != handle.path);
            }
            handle
        };

        let in_mask = self.inner.borrow().subscription_mask.contains(&kind);
        if in_mask {
            self.inner
                .borrow_mut()
                .subscription_event
                .notify(&(kind, event, handle));
        }
    }

    fn fail(&self, err: ContextError) {
        warn!(%err, "context handshake failed");
        self.inner.borrow_mut().last_error = Some(Rc::new(err));
        self.set_state(ContextState::Error);
    }

    fn set_state(&self, state: ContextState) {
        debug!(?state, "context state transition");
        self.inner.borrow_mut().state = state;
        self.inner.borrow_mut().state_notify.notify(&state);
        self.notify_property("state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::StubBus;
    use pinos_core::reactor::Reactor;
    use std::cell::RefCell as StdRefCell;
    use std::time::Duration;

    fn trace(ctx: &Context<StubBus>) -> Rc<StdRefCell<Vec<ContextState>>> {
        let trace = Rc::new(StdRefCell::new(Vec::new()));
        let trace_clone = trace.clone();
        ctx.on_state_change(move |state| trace_clone.borrow_mut().push(*state));
        trace
    }

    /// Run `rounds` reactor cycles, applying any outcome each produces. The
    /// happy-path handshake needs two: one to watch the name, one to connect
    /// the client.
    fn pump(reactor: &mut Reactor, ctx: &Context<StubBus>, rounds: usize) {
        for _ in 0..rounds {
            reactor
                .run_once(Some(Duration::from_millis(200)))
                .unwrap();
            ctx.poll();
        }
    }

    fn new_ctx(reactor: &Reactor) -> Context<StubBus> {
        Context::new("app", None, reactor.handle())
    }

    #[test]
    fn connect_happy_path_reaches_ready() {
        let mut reactor = Reactor::new().unwrap();
        let ctx = new_ctx(&reactor);
        let trace = trace(&ctx);
        ctx.connect(Arc::new(StubBus::new()), ConnectFlags::NONE)
            .unwrap();
        pump(&mut reactor, &ctx, 2);

        assert_eq!(ctx.state(), ContextState::Ready);
        assert!(ctx.error().is_none());
        assert_eq!(
            *trace.borrow(),
            vec![
                ContextState::Connecting,
                ContextState::Registering,
                ContextState::Ready,
            ]
        );
    }

    #[test]
    fn no_fail_recovers_from_name_vanish() {
        let mut reactor = Reactor::new().unwrap();
        let ctx = new_ctx(&reactor);
        ctx.connect(Arc::new(StubBus::new()), ConnectFlags::NO_FAIL)
            .unwrap();
        pump(&mut reactor, &ctx, 2);
        assert_eq!(ctx.state(), ContextState::Ready);

        let trace = trace(&ctx);
        ctx.handle_name_vanished();
        pump(&mut reactor, &ctx, 1);
        assert_eq!(ctx.state(), ContextState::Ready);
        assert_eq!(
            *trace.borrow(),
            vec![
                ContextState::Connecting,
                ContextState::Registering,
                ContextState::Ready,
            ]
        );
    }

    #[test]
    fn without_no_fail_name_vanish_is_fatal() {
        let mut reactor = Reactor::new().unwrap();
        let ctx = new_ctx(&reactor);
        ctx.connect(Arc::new(StubBus::new()), ConnectFlags::NONE)
            .unwrap();
        pump(&mut reactor, &ctx, 2);

        ctx.handle_name_vanished();
        assert_eq!(ctx.state(), ContextState::Error);
        assert!(matches!(
            *ctx.error().unwrap(),
            ContextError::Core(CoreError::ConnectionClosed)
        ));
    }

    #[test]
    fn client_disappearing_while_ready_is_fatal() {
        let mut reactor = Reactor::new().unwrap();
        let ctx = new_ctx(&reactor);
        ctx.connect(Arc::new(StubBus::new()), ConnectFlags::NONE)
            .unwrap();
        pump(&mut reactor, &ctx, 2);

        ctx.handle_client_removed("/c/1");
        assert_eq!(ctx.state(), ContextState::Error);
        assert!(matches!(
            *ctx.error().unwrap(),
            ContextError::Core(CoreError::ClientDisappeared)
        ));
    }

    #[test]
    fn client_disappearing_during_orderly_disconnect_is_not_an_error() {
        let mut reactor = Reactor::new().unwrap();
        let ctx = new_ctx(&reactor);
        ctx.connect(Arc::new(StubBus::new()), ConnectFlags::NONE)
            .unwrap();
        pump(&mut reactor, &ctx, 2);

        ctx.inner.borrow_mut().disconnecting = true;
        ctx.handle_client_removed("/c/1");
        assert_eq!(ctx.state(), ContextState::Ready);
    }

    #[test]
    fn subscription_event_only_fires_for_masked_kinds() {
        let reactor = Reactor::new().unwrap();
        let ctx = new_ctx(&reactor);
        let mut mask = HashSet::new();
        mask.insert(Kind::Source);
        ctx.set_subscription_mask(mask);

        let seen = Rc::new(StdRefCell::new(0));
        let seen_clone = seen.clone();
        ctx.on_subscription_event(move |_| *seen_clone.borrow_mut() += 1);

        ctx.apply_roster_delta(Kind::Sink, RosterEvent::New, "/sink/1");
        assert_eq!(*seen.borrow(), 0);

        ctx.apply_roster_delta(Kind::Source, RosterEvent::New, "/source/1");
        assert_eq!(*seen.borrow(), 1);
    }

    #[test]
    fn disconnect_without_client_goes_straight_to_unconnected() {
        let reactor = Reactor::new().unwrap();
        let ctx = new_ctx(&reactor);
        ctx.disconnect().unwrap();
        assert_eq!(ctx.state(), ContextState::Unconnected);
    }

    #[test]
    fn disconnect_with_client_posts_and_completes_on_poll() {
        let mut reactor = Reactor::new().unwrap();
        let ctx = new_ctx(&reactor);
        ctx.connect(Arc::new(StubBus::new()), ConnectFlags::NONE)
            .unwrap();
        pump(&mut reactor, &ctx, 2);
        assert_eq!(ctx.state(), ContextState::Ready);

        ctx.disconnect().unwrap();
        pump(&mut reactor, &ctx, 1);
        assert_eq!(ctx.state(), ContextState::Unconnected);
        assert!(ctx.inner.borrow().client.is_none());
    }

    #[test]
    fn ready_implies_daemon_and_client_handles_present() {
        let mut reactor = Reactor::new().unwrap();
        let ctx = new_ctx(&reactor);
        ctx.connect(Arc::new(StubBus::new()), ConnectFlags::NONE)
            .unwrap();
        pump(&mut reactor, &ctx, 2);
        assert_eq!(ctx.state(), ContextState::Ready);
        let inner = ctx.inner.borrow();
        assert!(inner.daemon.is_some());
        assert!(inner.client.is_some());
    }

    #[test]
    fn property_changed_fires_for_state_and_connection() {
        let mut reactor = Reactor::new().unwrap();
        let ctx = new_ctx(&reactor);
        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        ctx.on_property_changed(move |key| seen_clone.borrow_mut().push(key.clone()));

        ctx.connect(Arc::new(StubBus::new()), ConnectFlags::NONE)
            .unwrap();
        pump(&mut reactor, &ctx, 2);
        assert_eq!(ctx.state(), ContextState::Ready);
        assert!(seen.borrow().iter().any(|k| k == "connection"));
        assert!(seen.borrow().iter().filter(|k| *k == "state").count() >= 3);
    }

    #[test]
    fn connect_twice_is_rejected() {
        let reactor = Reactor::new().unwrap();
        let ctx = new_ctx(&reactor);
        ctx.connect(Arc::new(StubBus::new()), ConnectFlags::NONE)
            .unwrap();
        assert!(matches!(
            ctx.connect(Arc::new(StubBus::new()), ConnectFlags::NONE),
            Err(ContextError::AlreadyConnected)
        ));
    }
}
