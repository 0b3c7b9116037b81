//! Subscribe-roster contract.
//!
//! Given a bus connection and a service name, this tracks the live remote
//! objects the daemon exposes, grouped by [`Kind`], and streams
//! `(kind, event, handle)` deltas. The concrete mechanism a real bus uses to
//! discover these objects (typically watching an object-manager interface) is
//! out of scope — [`Subscribe`] only owns the roster and the delta stream;
//! something driving the real bus feeds it via [`Subscribe::apply`].

use hashbrown::HashMap;

/// The kinds of remote object a [`Subscribe`] roster tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// The daemon singleton itself.
    Daemon,
    /// A connected client (including, for one entry, this context's own client).
    Client,
    /// A media source.
    Source,
    /// A media sink.
    Sink,
    /// A channel on a source or sink.
    Channel,
}

/// A roster delta kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterEvent {
    /// A new object appeared.
    New,
    /// An existing object's properties changed.
    Change,
    /// An object was removed.
    Remove,
}

/// A remote object's opaque handle: its kind and bus object path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handle {
    /// The handle's kind.
    pub kind: Kind,
    /// The remote object's bus path.
    pub path: String,
}

/// The roster's own readiness, distinct from [`crate::context::ContextState`]:
/// a `Subscribe` is `Ready` once it has resolved at least the `Daemon` handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeState {
    /// No `Daemon` handle has been observed yet.
    Unconnected,
    /// At least the `Daemon` handle has resolved.
    Ready,
}

/// The live roster of remote objects observed through a bus subscription.
pub struct Subscribe {
    state: SubscribeState,
    roster: HashMap<(Kind, String), Handle>,
    events_tx: flume::Sender<(Kind, RosterEvent, Handle)>,
    events_rx: flume::Receiver<(Kind, RosterEvent, Handle)>,
}

impl Default for Subscribe {
    fn default() -> Self {
        let (events_tx, events_rx) = flume::unbounded();
        Self {
            state: SubscribeState::Unconnected,
            roster: HashMap::new(),
            events_tx,
            events_rx,
        }
    }
}

impl Subscribe {
    /// A fresh, `Unconnected` roster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The roster's current readiness.
    #[must_use]
    pub fn state(&self) -> SubscribeState {
        self.state
    }

    /// A receiver of every `(kind, event, handle)` delta applied so far.
    #[must_use]
    pub fn events(&self) -> flume::Receiver<(Kind, RosterEvent, Handle)> {
        self.events_rx.clone()
    }

    /// Look up the current handle for `(kind, path)`, if tracked.
    #[must_use]
    pub fn get(&self, kind: Kind, path: &str) -> Option<&Handle> {
        self.roster.get(&(kind, path.to_string()))
    }

    /// All tracked handles of a given kind.
    pub fn all(&self, kind: Kind) -> impl Iterator<Item = &Handle> {
        self.roster
            .values()
            .filter(move |h| h.kind == kind)
    }

    /// Apply one roster delta: update the roster, flip to `Ready` on the first
    /// `Daemon` handle, and publish the delta on the event stream.
    pub fn apply(&mut self, kind: Kind, event: RosterEvent, path: impl Into<String>) {
        let path = path.into();
        let handle = Handle { kind, path: path.clone() };
        match event {
            RosterEvent::New | RosterEvent::Change => {
                self.roster.insert((kind, path), handle.clone());
            }
            RosterEvent::Remove => {
                self.roster.remove(&(kind, path));
            }
        }
        if kind == Kind::Daemon && matches!(event, RosterEvent::New) {
            self.state = SubscribeState::Ready;
        }
        let _ = self.events_tx.send((kind, event, handle));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn becomes_ready_once_daemon_resolves() {
        let mut sub = Subscribe::new();
        assert_eq!(sub.state(), SubscribeState::Unconnected);
        sub.apply(Kind::Daemon, RosterEvent::New, "/daemon");
        assert_eq!(sub.state(), SubscribeState::Ready);
    }

    #[test]
    fn tracks_roster_by_kind() {
        let mut sub = Subscribe::new();
        sub.apply(Kind::Source, RosterEvent::New, "/source/1");
        sub.apply(Kind::Sink, RosterEvent::New, "/sink/1");
        assert_eq!(sub.all(Kind::Source).count(), 1);
        sub.apply(Kind::Source, RosterEvent::Remove, "/source/1");
        assert_eq!(sub.all(Kind::Source).count(), 0);
    }
}
