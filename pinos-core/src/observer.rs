//! Closure-based observer registries.
//!
//! The original object model notifies interested parties through generic
//! signal/property-notify machinery. We replace that with explicit, typed
//! per-event-kind registries: each event kind gets its own small `Vec` of boxed
//! closures rather than a single generic dispatcher.

use smallvec::SmallVec;

/// A registry of handlers for a fire-and-forget event of type `T`.
///
/// Used for events with no veto semantics (`unlinked`, `remove`, `format-request`,
/// property-change notifications).
pub struct Notifier<T> {
    // Unlike `pinos_core::reactor::Reactor`'s cross-thread `Task` queue, these
    // handlers are only ever invoked on the reactor thread that owns the
    // `Port`/`Context` they are attached to, so they do not need to be `Send`
    // — this is what lets a handler close over `Rc`-based single-threaded state.
    handlers: SmallVec<[Box<dyn FnMut(&T)>; 4]>,
}

impl<T> Default for Notifier<T> {
    fn default() -> Self {
        Self {
            handlers: SmallVec::new(),
        }
    }
}

impl<T> Notifier<T> {
    /// An empty notifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Handlers run in registration order.
    pub fn subscribe(&mut self, handler: impl FnMut(&T) + 'static) {
        self.handlers.push(Box::new(handler));
    }

    /// Invoke every registered handler with `event`.
    pub fn notify(&mut self, event: &T) {
        for handler in &mut self.handlers {
            handler(event);
        }
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether any handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// A registry of handlers for a vetoable event of type `T`.
///
/// Used for `Port::linked`, where every handler gets a vote and the operation is
/// accepted only if *all* handlers agree (a boolean AND-fold). A registry with no
/// handlers accepts by default.
pub struct VetoNotifier<T> {
    handlers: SmallVec<[Box<dyn FnMut(&T) -> bool>; 4]>,
}

impl<T> Default for VetoNotifier<T> {
    fn default() -> Self {
        Self {
            handlers: SmallVec::new(),
        }
    }
}

impl<T> VetoNotifier<T> {
    /// An empty veto notifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a veto-capable handler.
    pub fn subscribe(&mut self, handler: impl FnMut(&T) -> bool + 'static) {
        self.handlers.push(Box::new(handler));
    }

    /// Poll every handler; returns `true` only if every handler voted `true`.
    ///
    /// All handlers are invoked regardless of an earlier veto, matching the
    /// original accumulator semantics of "everyone gets a chance to observe, the
    /// first `false` wins the final verdict."
    pub fn poll(&mut self, event: &T) -> bool {
        let mut accepted = true;
        for handler in &mut self.handlers {
            if !handler(event) {
                accepted = false;
            }
        }
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifier_runs_all_handlers_in_order() {
        let mut n = Notifier::<i32>::new();
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let a = seen.clone();
        n.subscribe(move |v| a.lock().unwrap().push(*v));
        let b = seen.clone();
        n.subscribe(move |v| b.lock().unwrap().push(*v * 10));
        n.notify(&3);
        assert_eq!(*seen.lock().unwrap(), vec![3, 30]);
    }

    #[test]
    fn veto_notifier_defaults_to_accept() {
        let mut v = VetoNotifier::<()>::new();
        assert!(v.poll(&()));
    }

    #[test]
    fn veto_notifier_rejects_on_any_false() {
        let mut v = VetoNotifier::<()>::new();
        v.subscribe(|_| true);
        v.subscribe(|_| false);
        v.subscribe(|_| true);
        assert!(!v.poll(&()));
    }
}
