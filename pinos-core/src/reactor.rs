//! The single-threaded cooperative reactor that every `Context` and `Port` binds to.
//!
//! A single-writer, lock-free model is required: a `Context`/`Port`'s
//! state is mutated only on the reactor thread it is bound to, and any cross-thread
//! entry point only *posts* a task there: a `flume` command channel is
//! multiplexed with socket readiness in one poll loop, built around `mio`'s
//! readiness-based model rather than an async/completion reactor, because
//! this transport's `recvmsg`/`sendmsg` + `SCM_RIGHTS` exchange is fundamentally a
//! readiness-driven blocking-call model, which `io_uring` completions don't fit.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest as MioInterest, Poll, Token, Waker};

use crate::error::Result;

const WAKE_TOKEN: Token = Token(usize::MAX);

/// Readiness kinds a reactor source can be interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    /// The fd has data ready to read.
    Readable,
    /// The fd can accept a write without blocking.
    Writable,
}

impl Interest {
    fn to_mio(self) -> MioInterest {
        match self {
            Self::Readable => MioInterest::READABLE,
            Self::Writable => MioInterest::WRITABLE,
        }
    }
}

type Task = Box<dyn FnOnce(&mut Reactor) + Send>;
// Readiness handlers run only on the reactor's own thread (the owning Port or
// Context never hands its socket to another thread), so unlike `Task` they do
// not need to be `Send` — this is what lets a handler close over `Rc`-based
// single-threaded state.
type ReadinessHandler = Box<dyn FnMut(Interest)>;

/// A single-threaded, cooperative reactor.
///
/// Owns an `mio::Poll`, a registry of readiness callbacks keyed by `Token`, and a
/// task queue used to receive work posted from other threads. Nothing here is
/// locked: all mutation happens inside `run_once`/`run`, which the owning thread
/// alone calls.
pub struct Reactor {
    poll: Poll,
    events: Events,
    waker: Arc<Waker>,
    handlers: HashMap<Token, ReadinessHandler>,
    task_rx: flume::Receiver<Task>,
    task_tx: flume::Sender<Task>,
    next_token: usize,
}

impl Reactor {
    /// Create a new reactor with its own `mio` poll instance.
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        let (task_tx, task_rx) = flume::unbounded();
        Ok(Self {
            poll,
            events: Events::with_capacity(128),
            waker,
            handlers: HashMap::new(),
            task_rx,
            task_tx,
            next_token: 0,
        })
    }

    /// A cloneable handle that can post tasks onto this reactor from any thread.
    #[must_use]
    pub fn handle(&self) -> ReactorHandle {
        ReactorHandle {
            task_tx: self.task_tx.clone(),
            waker: self.waker.clone(),
        }
    }

    /// Register `fd` for the given `interest`, dispatching readiness events to
    /// `handler`. Returns the token to later `deregister` with.
    pub fn register(
        &mut self,
        fd: RawFd,
        interest: Interest,
        handler: impl FnMut(Interest) + 'static,
    ) -> Result<Token> {
        let token = Token(self.next_token);
        self.next_token += 1;
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), token, interest.to_mio())?;
        self.handlers.insert(token, Box::new(handler));
        Ok(token)
    }

    /// Stop watching a previously registered fd.
    pub fn deregister(&mut self, fd: RawFd, token: Token) -> Result<()> {
        self.poll.registry().deregister(&mut SourceFd(&fd))?;
        self.handlers.remove(&token);
        Ok(())
    }

    /// Run one poll cycle: drain posted tasks, then dispatch at most one batch of
    /// readiness events. `timeout = None` blocks until a wake or an event arrives.
    pub fn run_once(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.poll.poll(&mut self.events, timeout)?;

        let mut woken = false;
        for event in &self.events {
            if event.token() == WAKE_TOKEN {
                woken = true;
                continue;
            }
            let interest = if event.is_readable() {
                Interest::Readable
            } else {
                Interest::Writable
            };
            if let Some(handler) = self.handlers.get_mut(&event.token()) {
                handler(interest);
            }
        }

        if woken {
            while let Ok(task) = self.task_rx.try_recv() {
                task(self);
            }
        }
        Ok(())
    }

    /// Run `run_once` in a loop until `should_stop` returns `true`.
    pub fn run_until(&mut self, mut should_stop: impl FnMut() -> bool) -> io::Result<()> {
        while !should_stop() {
            self.run_once(None)?;
        }
        Ok(())
    }
}

/// A cross-thread handle used to post work onto a [`Reactor`].
///
/// Cloning is cheap; every clone shares the same task queue and wakes the same
/// reactor.
#[derive(Clone)]
pub struct ReactorHandle {
    task_tx: flume::Sender<Task>,
    waker: Arc<Waker>,
}

impl ReactorHandle {
    /// Post a task to run on the owning reactor's thread, waking it if it is
    /// currently blocked in `poll`.
    pub fn post(&self, task: impl FnOnce(&mut Reactor) + Send + 'static) {
        // A full queue only happens if the reactor has been dropped; losing the
        // task in that case is the correct behavior (nothing will ever run it).
        let _ = self.task_tx.send(Box::new(task));
        let _ = self.waker.wake();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn posted_task_runs_after_wake() {
        let mut reactor = Reactor::new().unwrap();
        let handle = reactor.handle();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        handle.post(move |_| ran_clone.store(true, Ordering::SeqCst));
        reactor.run_once(Some(Duration::from_millis(200))).unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }
}
