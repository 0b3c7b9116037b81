//! End-to-end scenario: a peer writes a framed control buffer onto a port's
//! socketpair, the reactor dispatches the readiness event, and the port's
//! `format` and `on_received_buffer` callback observe it.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use std::time::Duration;

use pinos_core::fdpass::send_with_fds;
use pinos_core::reactor::Reactor;
use pinos_port::control;
use pinos_port::port::{Direction, Port};

#[test]
fn socketpair_frame_round_trip_updates_format_and_peek_buffer() {
    let mut reactor = Reactor::new().unwrap();
    let port = Port::new("in", Direction::Input);
    let peer_socket = port.get_socket_pair(&mut reactor).unwrap();

    let seen_during_callback = Rc::new(RefCell::new(None));
    let seen_clone = seen_during_callback.clone();
    port.set_received_buffer_cb(move |buf| {
        *seen_clone.borrow_mut() = Some(buf.payload().clone());
    });

    let frame = control::format_change_buffer(0, "audio/raw");
    send_with_fds(&peer_socket, &frame.header().encode(), &[]).unwrap();
    send_with_fds(&peer_socket, frame.payload(), &[]).unwrap();
    peer_socket.flush().ok();

    reactor.run_once(Some(Duration::from_millis(500))).unwrap();

    assert_eq!(port.format(), Some("audio/raw".to_string()));
    assert!(seen_during_callback.borrow().is_some());
    // Only valid during the callback itself.
    assert!(port.peek_buffer().is_none());
}
