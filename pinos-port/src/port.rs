//! Port: a node endpoint carrying framed buffers in one direction.
//!
//! The original object model is a GObject with bidirectional strong references
//! between linked ports and a GC to break cycles. We replace that with `Rc`
//! ownership held by the node, `Weak` peer references (so linking never keeps a
//! port alive on its own), and a `RefCell` for the single-writer, reactor-bound
//! mutable state.

use std::cell::RefCell;
use std::io::Read;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::rc::{Rc, Weak};

use bytes::Bytes;
use smallvec::SmallVec;
use tracing::{debug, warn};

use pinos_core::error::Error as CoreError;
use pinos_core::observer::{Notifier, VetoNotifier};
use pinos_core::properties::Properties;
use pinos_core::reactor::{Interest, Reactor, ReactorHandle};
use pinos_core::staging::Staging;

use crate::buffer::{Buffer, MAX_FDS};
use crate::control::{self, ControlPacket};
use crate::error::{PortError, Result};
use crate::format::FormatAlgebra;
use crate::header::{Header, HEADER_LEN};
use crate::socketpair;

/// The direction a port carries buffers in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Accepts buffers from linked output ports. Defaults to `max_peers = 1`.
    Input,
    /// Produces buffers for linked input ports. Defaults to unbounded peers.
    Output,
}

struct Inner {
    name: String,
    direction: Direction,
    properties: Properties,
    max_peers: usize,
    peers: Vec<Weak<RefCell<Inner>>>,
    possible_formats: Option<String>,
    format: Option<String>,
    local_socket: Option<UnixStream>,
    peer_socket: Option<UnixStream>,
    reactor_token: Option<mio::Token>,
    reactor_handle: Option<ReactorHandle>,
    recv_staging: Staging,
    send_staging: Staging,
    current_inbound_buffer: Option<Buffer>,
    on_received_buffer: Option<Box<dyn FnMut(&Buffer)>>,
    linked: VetoNotifier<Port>,
    unlinked: Notifier<Port>,
    format_request: Notifier<()>,
    remove: Notifier<()>,
    property_changed: Notifier<String>,
}

/// A node's endpoint. Cheaply cloneable (an `Rc` clone); every clone refers to
/// the same underlying state.
#[derive(Clone)]
pub struct Port {
    inner: Rc<RefCell<Inner>>,
}

impl Port {
    /// Create a new, unlinked port with the direction's default `max_peers`
    /// (`Output` unbounded, `Input` one).
    #[must_use]
    pub fn new(name: impl Into<String>, direction: Direction) -> Self {
        let max_peers = match direction {
            Direction::Output => usize::MAX,
            Direction::Input => 1,
        };
        let mut properties = Properties::new();
        let name = name.into();
        properties.set("port.name", name.clone());
        Self {
            inner: Rc::new(RefCell::new(Inner {
                name,
                direction,
                properties,
                max_peers,
                peers: Vec::new(),
                possible_formats: None,
                format: None,
                local_socket: None,
                peer_socket: None,
                reactor_token: None,
                reactor_handle: None,
                recv_staging: Staging::new(),
                send_staging: Staging::new(),
                current_inbound_buffer: None,
                on_received_buffer: None,
                linked: VetoNotifier::new(),
                unlinked: Notifier::new(),
                format_request: Notifier::new(),
                remove: Notifier::new(),
                property_changed: Notifier::new(),
            })),
        }
    }

    /// The port's name.
    #[must_use]
    pub fn name(&self) -> String {
        self.inner.borrow().name.clone()
    }

    /// The port's direction.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.inner.borrow().direction
    }

    /// A clone of the port's current properties.
    #[must_use]
    pub fn properties(&self) -> Properties {
        self.inner.borrow().properties.clone()
    }

    /// The number of peers this port currently allows.
    #[must_use]
    pub fn max_peers(&self) -> usize {
        self.inner.borrow().max_peers
    }

    /// Override `max_peers` (e.g. a mixer input that accepts many sources).
    pub fn set_max_peers(&self, max_peers: usize) {
        self.inner.borrow_mut().max_peers = max_peers;
    }

    /// Set (or clear, with `None`) the possible-formats blob an owner advertises.
    pub fn set_possible_formats(&self, formats: Option<String>) {
        self.inner.borrow_mut().possible_formats = formats;
    }

    /// The negotiated format, if any.
    #[must_use]
    pub fn format(&self) -> Option<String> {
        self.inner.borrow().format.clone()
    }

    /// Install a received-buffer callback, replacing any previous one. The
    /// previous closure's resources are released when it is dropped here —
    /// Rust's ownership model replaces the original model's explicit
    /// destroy-notify callback.
    pub fn set_received_buffer_cb(&self, cb: impl FnMut(&Buffer) + 'static) {
        self.inner.borrow_mut().on_received_buffer = Some(Box::new(cb));
    }

    /// Subscribe to `linked` events. Return `false` to veto a pending link.
    pub fn on_linked(&self, handler: impl FnMut(&Port) -> bool + 'static) {
        self.inner.borrow_mut().linked.subscribe(handler);
    }

    /// Subscribe to `unlinked` events.
    pub fn on_unlinked(&self, handler: impl FnMut(&Port) + 'static) {
        self.inner.borrow_mut().unlinked.subscribe(handler);
    }

    /// Subscribe to `format-request` events, fired just before
    /// `possible_formats`/`filter_formats` reads the advertised formats.
    pub fn on_format_request(&self, handler: impl FnMut(&()) + 'static) {
        self.inner.borrow_mut().format_request.subscribe(handler);
    }

    /// Subscribe to `remove` events, fired from [`Port::close`].
    pub fn on_remove(&self, handler: impl FnMut(&()) + 'static) {
        self.inner.borrow_mut().remove.subscribe(handler);
    }

    /// Subscribe to property-change notifications, fired with the changed
    /// property's key (`"format"` after a `FormatChange` control packet,
    /// `"peer-paths"` after `link`/`unlink`).
    pub fn on_property_changed(&self, handler: impl FnMut(&String) + 'static) {
        self.inner.borrow_mut().property_changed.subscribe(handler);
    }

    /// Recompute the `peer-paths` property from the current peer list and
    /// fire a `"peer-paths"` property-change notification.
    fn refresh_peer_paths(&self) {
        let joined = self
            .get_links()
            .iter()
            .map(Port::name)
            .collect::<Vec<_>>()
            .join(",");
        self.inner.borrow_mut().properties.set("peer-paths", joined);
        self.inner
            .borrow_mut()
            .property_changed
            .notify(&"peer-paths".to_string());
    }

    /// Fetch the advertised possible formats, giving the owner a chance to
    /// refresh them first via a `format-request` notification.
    pub fn get_possible_formats(&self) -> Option<String> {
        self.inner.borrow_mut().format_request.notify(&());
        self.inner.borrow().possible_formats.clone()
    }

    /// Intersect `possible_formats` with an optional `filter`, recursing
    /// through linked peers when this is an `Output` port.
    pub fn filter_formats<A>(&self, algebra: &A, filter: Option<&str>) -> Result<String>
    where
        A: FormatAlgebra,
    {
        self.inner.borrow_mut().format_request.notify(&());
        let possible = self
            .inner
            .borrow()
            .possible_formats
            .clone()
            .ok_or_else(|| PortError::Core(CoreError::NotFound))?;
        let mut parsed = algebra.parse(&possible)?;
        if let Some(filter_str) = filter {
            let filter_parsed = algebra.parse(filter_str)?;
            parsed = algebra.intersect(&parsed, &filter_parsed, true);
        }
        if self.direction() == Direction::Output {
            for peer in self.get_links() {
                let narrowed = algebra.to_string(&parsed);
                let peer_str = peer.filter_formats(algebra, Some(&narrowed))?;
                let peer_parsed = algebra.parse(&peer_str)?;
                parsed = algebra.intersect(&parsed, &peer_parsed, true);
            }
        }
        if algebra.is_empty(&parsed) {
            return Err(PortError::Core(CoreError::NotFound));
        }
        Ok(algebra.to_string(&parsed))
    }

    fn handle(&self) -> Weak<RefCell<Inner>> {
        Rc::downgrade(&self.inner)
    }

    fn same_port(&self, other: &Port) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The ports currently linked to this one.
    #[must_use]
    pub fn get_links(&self) -> Vec<Port> {
        self.inner
            .borrow()
            .peers
            .iter()
            .filter_map(|weak| weak.upgrade().map(|inner| Port { inner }))
            .collect()
    }

    /// Link `src` (an `Output` port) to `dst` (an `Input` port). Arguments are
    /// swapped automatically if passed in the other order.
    pub fn link(a: &Port, b: &Port) -> Result<()> {
        let (src, dst) = match (a.direction(), b.direction()) {
            (Direction::Output, Direction::Input) => (a, b),
            (Direction::Input, Direction::Output) => (b, a),
            _ => return Err(PortError::DirectionMismatch),
        };

        {
            let src_inner = src.inner.borrow();
            if src_inner.peers.len() >= src_inner.max_peers {
                return Err(PortError::AtCapacity(src_inner.max_peers));
            }
        }
        {
            let dst_inner = dst.inner.borrow();
            if dst_inner.peers.len() >= dst_inner.max_peers {
                return Err(PortError::AtCapacity(dst_inner.max_peers));
            }
        }

        // Every handler on both sides gets a vote; the link only proceeds if
        // none of them vetoed.
        let src_ok = src.inner.borrow_mut().linked.poll(dst);
        let dst_ok = dst.inner.borrow_mut().linked.poll(src);
        if !(src_ok & dst_ok) {
            return Err(PortError::Core(CoreError::Vetoed));
        }

        src.inner.borrow_mut().peers.push(dst.handle());
        dst.inner.borrow_mut().peers.push(src.handle());
        src.refresh_peer_paths();
        dst.refresh_peer_paths();
        debug!(src = %src.name(), dst = %dst.name(), "linked");

        if let Some(format) = src.format() {
            let change = control::format_change_buffer(0, &format);
            dst.receive_buffer(&change)?;
        }
        Ok(())
    }

    /// Remove a link between two ports. A no-op if they were not linked.
    pub fn unlink(&self, other: &Port) -> Result<()> {
        let other_weak = other.handle();
        let self_weak = self.handle();
        self.inner
            .borrow_mut()
            .peers
            .retain(|p| !weak_eq(p, &other_weak));
        other
            .inner
            .borrow_mut()
            .peers
            .retain(|p| !weak_eq(p, &self_weak));
        self.refresh_peer_paths();
        other.refresh_peer_paths();
        self.inner.borrow_mut().unlinked.notify(other);
        other.inner.borrow_mut().unlinked.notify(self);
        debug!(a = %self.name(), b = %other.name(), "unlinked");
        Ok(())
    }

    fn parse_and_apply_control(&self, buf: &Buffer) -> Result<()> {
        for packet in control::parse_packets(buf)? {
            if let ControlPacket::FormatChange { format, .. } = packet {
                self.inner.borrow_mut().format = Some(format);
                self.inner
                    .borrow_mut()
                    .property_changed
                    .notify(&"format".to_string());
            }
        }
        Ok(())
    }

    /// Send `buf` out this port: to the attached socket (if any) and to every
    /// linked peer. Fan-out continues past a failing peer; the first failure
    /// is what this call returns.
    pub fn send_buffer(&self, buf: &Buffer) -> Result<()> {
        if buf.is_control() {
            self.parse_and_apply_control(buf)?;
        }
        self.write_to_socket(buf)?;

        let mut first_err = None;
        for peer in self.get_links() {
            if let Err(err) = peer.receive_buffer(buf) {
                warn!(peer = %peer.name(), %err, "fan-out to peer failed");
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Deliver a buffer that arrived from a peer's `send_buffer` fan-out (or
    /// directly, for a port with no socket of its own).
    pub fn receive_buffer(&self, buf: &Buffer) -> Result<()> {
        if self.inner.borrow().current_inbound_buffer.is_some() {
            return Err(PortError::Core(CoreError::Busy));
        }
        if buf.is_control() {
            self.parse_and_apply_control(buf)?;
        }
        if self.inner.borrow().local_socket.is_some() {
            self.write_to_socket(buf)
        } else {
            self.inner.borrow_mut().current_inbound_buffer = Some(buf.clone());
            if let Some(cb) = self.inner.borrow_mut().on_received_buffer.as_mut() {
                cb(buf);
            }
            self.inner.borrow_mut().current_inbound_buffer = None;
            Ok(())
        }
    }

    /// The buffer currently being delivered, valid only from within an
    /// `on_received_buffer` callback.
    #[must_use]
    pub fn peek_buffer(&self) -> Option<Buffer> {
        self.inner.borrow().current_inbound_buffer.clone()
    }

    fn write_to_socket(&self, buf: &Buffer) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.local_socket.is_none() {
            return Ok(());
        }
        let header = buf.header();
        let payload = buf.payload();
        let fds = buf.fds();

        let fds_mut = inner.send_staging.fds_mut();
        fds_mut[..fds.len()].copy_from_slice(fds);
        let staged_fds: SmallVec<[i32; 4]> = fds_mut[..fds.len()].iter().copied().collect();

        let mut slot = inner.send_staging.acquire_payload(payload.len());
        slot.as_mut_slice().copy_from_slice(payload);

        let sock = inner.local_socket.as_ref().expect("checked above");
        pinos_core::fdpass::send_with_fds(sock, &header.encode(), &staged_fds)?;
        pinos_core::fdpass::send_with_fds(sock, slot.as_mut_slice(), &[])?;
        Ok(())
    }

    /// Lazily create the port's `AF_UNIX` `SOCK_STREAM` socketpair, attach the
    /// local end to `reactor`, and return a fresh clone of the peer end. Later
    /// calls return further clones of the same peer socket.
    pub fn get_socket_pair(&self, reactor: &mut Reactor) -> Result<UnixStream> {
        let needs_setup = self.inner.borrow().peer_socket.is_none();
        if needs_setup {
            let (local, peer) = socketpair::socketpair()?;
            let fd = local.as_raw_fd();
            let weak_self = self.handle();
            let token = reactor
                .register(fd, Interest::Readable, move |interest| {
                    if let Some(inner) = weak_self.upgrade() {
                        Port { inner }.on_socket_ready(interest);
                    }
                })
                .map_err(PortError::Core)?;

            let mut inner = self.inner.borrow_mut();
            inner.reactor_handle = Some(reactor.handle());
            inner.reactor_token = Some(token);
            inner.local_socket = Some(local);
            inner.peer_socket = Some(peer);
        }
        let inner = self.inner.borrow();
        inner
            .peer_socket
            .as_ref()
            .expect("just created above")
            .try_clone()
            .map_err(|e| PortError::Core(CoreError::IoError(e)))
    }

    fn on_socket_ready(&self, interest: Interest) {
        if interest != Interest::Readable {
            warn!(port = %self.name(), "writable reactor event on port socket, ignoring");
            return;
        }
        if let Err(err) = self.read_one_frame() {
            warn!(port = %self.name(), %err, "dropping frame after transport error");
        }
    }

    fn read_one_frame(&self) -> Result<()> {
        let mut header_bytes = [0u8; HEADER_LEN];
        let mut fd_slots = [-1i32; MAX_FDS];
        let read_fds = {
            let inner = self.inner.borrow();
            let sock = inner
                .local_socket
                .as_ref()
                .ok_or_else(|| PortError::protocol("no socket attached"))?;
            let (n, nfds) =
                pinos_core::fdpass::recv_with_fds(sock, &mut header_bytes, &mut fd_slots)?;
            if n == 0 && nfds == 0 {
                return Err(PortError::protocol("peer closed connection"));
            }
            if n != HEADER_LEN {
                return Err(PortError::protocol("short header read"));
            }
            nfds
        };
        let header = Header::decode(&header_bytes)?;

        let mut sock_clone = {
            let inner = self.inner.borrow();
            let sock = inner
                .local_socket
                .as_ref()
                .ok_or_else(|| PortError::protocol("no socket attached"))?;
            sock.try_clone().map_err(|e| PortError::Core(CoreError::IoError(e)))?
        };
        let payload = {
            let mut inner = self.inner.borrow_mut();
            let mut slot = inner.recv_staging.acquire_payload(header.length as usize);
            sock_clone
                .read_exact(slot.as_mut_slice())
                .map_err(|e| PortError::Core(CoreError::IoError(e)))?;
            Bytes::from(slot.into_owned())
        };

        let fds: SmallVec<[i32; 4]> = fd_slots[..read_fds].iter().copied().collect();
        let buf = Buffer::from_wire(header, payload, fds);
        if buf.is_control() {
            self.parse_and_apply_control(&buf)?;
        }
        self.send_buffer_to_peers(&buf)
    }

    fn send_buffer_to_peers(&self, buf: &Buffer) -> Result<()> {
        self.inner.borrow_mut().current_inbound_buffer = Some(buf.clone());
        if let Some(cb) = self.inner.borrow_mut().on_received_buffer.as_mut() {
            cb(buf);
        }
        self.inner.borrow_mut().current_inbound_buffer = None;

        let mut first_err = None;
        for peer in self.get_links() {
            if let Err(err) = peer.receive_buffer(buf) {
                warn!(peer = %peer.name(), %err, "fan-out to peer failed");
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Tear the port down: unlink from every peer, fire `remove`, and detach
    /// the reactor source (if any socket was ever attached).
    pub fn close(&self) {
        for peer in self.get_links() {
            let _ = self.unlink(&peer);
        }
        self.inner.borrow_mut().remove.notify(&());

        let detach = {
            let inner = self.inner.borrow();
            match (&inner.local_socket, inner.reactor_token, inner.reactor_handle.clone()) {
                (Some(sock), Some(token), Some(handle)) => Some((sock.as_raw_fd(), token, handle)),
                _ => None,
            }
        };
        if let Some((fd, token, handle)) = detach {
            handle.post(move |reactor| {
                let _ = reactor.deregister(fd, token);
            });
        }
        let mut inner = self.inner.borrow_mut();
        inner.local_socket = None;
        inner.peer_socket = None;
    }
}

fn weak_eq(a: &Weak<RefCell<Inner>>, b: &Weak<RefCell<Inner>>) -> bool {
    Weak::ptr_eq(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;
    use std::rc::Rc as StdRc;

    #[test]
    fn link_requires_opposite_directions() {
        let a = Port::new("a", Direction::Output);
        let b = Port::new("b", Direction::Output);
        assert!(matches!(Port::link(&a, &b), Err(PortError::DirectionMismatch)));
    }

    #[test]
    fn link_is_symmetric_and_unlink_is_its_inverse() {
        let out = Port::new("out", Direction::Output);
        let inp = Port::new("in", Direction::Input);
        Port::link(&out, &inp).unwrap();
        assert_eq!(out.get_links().len(), 1);
        assert_eq!(inp.get_links().len(), 1);
        out.unlink(&inp).unwrap();
        assert!(out.get_links().is_empty());
        assert!(inp.get_links().is_empty());
    }

    #[test]
    fn input_port_refuses_second_link_at_default_capacity() {
        let out1 = Port::new("out1", Direction::Output);
        let out2 = Port::new("out2", Direction::Output);
        let inp = Port::new("in", Direction::Input);
        Port::link(&out1, &inp).unwrap();
        assert!(matches!(
            Port::link(&out2, &inp),
            Err(PortError::AtCapacity(1))
        ));
    }

    #[test]
    fn veto_prevents_link_and_leaves_state_unchanged() {
        let out = Port::new("out", Direction::Output);
        let inp = Port::new("in", Direction::Input);
        inp.on_linked(|_| false);
        let result = Port::link(&out, &inp);
        assert!(matches!(result, Err(PortError::Core(CoreError::Vetoed))));
        assert!(out.get_links().is_empty());
        assert!(inp.get_links().is_empty());
    }

    #[test]
    fn link_propagates_format_change_to_peer() {
        let out = Port::new("out", Direction::Output);
        out.inner.borrow_mut().format = Some("audio/raw".to_string());
        let inp = Port::new("in", Direction::Input);
        let received = StdRc::new(StdRefCell::new(None));
        let received_clone = received.clone();
        inp.set_received_buffer_cb(move |buf| {
            *received_clone.borrow_mut() = Some(buf.clone());
        });
        Port::link(&out, &inp).unwrap();
        assert_eq!(inp.format(), Some("audio/raw".to_string()));
        assert!(received.borrow().is_some());
    }

    #[test]
    fn link_is_idempotent_under_argument_swap() {
        let out = Port::new("out", Direction::Output);
        let inp = Port::new("in", Direction::Input);
        Port::link(&out, &inp).unwrap();
        let swapped_out = Port::new("out2", Direction::Output);
        let swapped_inp = Port::new("in2", Direction::Input);
        Port::link(&swapped_inp, &swapped_out).unwrap();
        assert_eq!(out.get_links().len(), swapped_out.get_links().len());
        assert_eq!(inp.get_links().len(), swapped_inp.get_links().len());
        assert_eq!(swapped_out.direction(), Direction::Output);
        assert_eq!(swapped_inp.direction(), Direction::Input);
    }

    #[test]
    fn filter_formats_with_no_filter_matches_possible_formats() {
        use crate::format::{FormatAlgebra, MimeFormat};

        let out = Port::new("out", Direction::Output);
        out.set_possible_formats(Some("audio/raw,rate=48000".to_string()));
        let algebra = MimeFormat;
        let filtered = out.filter_formats(&algebra, None).unwrap();
        let possible = out.get_possible_formats().unwrap();
        assert_eq!(
            algebra.to_string(&algebra.parse(&filtered).unwrap()),
            algebra.to_string(&algebra.parse(&possible).unwrap())
        );
    }

    #[test]
    fn link_and_unlink_refresh_peer_paths_property() {
        let out = Port::new("out", Direction::Output);
        let inp = Port::new("in", Direction::Input);
        let seen: StdRc<StdRefCell<Vec<String>>> = StdRc::new(StdRefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        out.on_property_changed(move |key| seen_clone.borrow_mut().push(key.clone()));

        Port::link(&out, &inp).unwrap();
        assert_eq!(out.properties().get("peer-paths"), Some("in"));
        out.unlink(&inp).unwrap();
        assert_eq!(out.properties().get("peer-paths"), Some(""));
        assert_eq!(*seen.borrow(), vec!["peer-paths", "peer-paths"]);
    }

    #[test]
    fn format_change_fires_property_notification() {
        let inp = Port::new("in", Direction::Input);
        let seen: StdRc<StdRefCell<Vec<String>>> = StdRc::new(StdRefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        inp.on_property_changed(move |key| seen_clone.borrow_mut().push(key.clone()));

        let change = control::format_change_buffer(0, "audio/raw");
        inp.receive_buffer(&change).unwrap();
        assert_eq!(inp.format(), Some("audio/raw".to_string()));
        assert_eq!(*seen.borrow(), vec!["format"]);
    }

    #[test]
    fn receive_buffer_rejects_reentrant_delivery() {
        let inp = Port::new("in", Direction::Input);
        inp.inner.borrow_mut().current_inbound_buffer =
            Some(Buffer::new(Bytes::from_static(b"x"), SmallVec::new()));
        let buf = Buffer::new(Bytes::from_static(b"y"), SmallVec::new());
        assert!(matches!(
            inp.receive_buffer(&buf),
            Err(PortError::Core(CoreError::Busy))
        ));
    }
}
