//! Framing round-trip law and raw socketpair fd-passing behavior.

use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;

use pinos_core::fdpass::{recv_with_fds, send_with_fds};
use pinos_port::header::{Flags, Header, HEADER_LEN};
use pinos_port::socketpair::socketpair;

use proptest::prelude::*;

fn arb_flags() -> impl Strategy<Value = Flags> {
    prop_oneof![Just(Flags::NONE), Just(Flags::CONTROL)]
}

proptest! {
    /// Every header round-trips through `encode`/`decode` unchanged.
    #[test]
    fn header_round_trips(length in 0u32..=1024, flags in arb_flags()) {
        let header = Header::new(length, flags);
        let decoded = Header::decode(&header.encode()).unwrap();
        prop_assert_eq!(decoded, header);
    }

    /// A payload of at most 1024 bytes, written on one end of a socketpair
    /// along with its header and fds, is read back identical on the other end.
    #[test]
    fn payload_round_trips_over_socketpair(
        payload in prop::collection::vec(any::<u8>(), 0..=1024),
    ) {
        let (local, peer) = socketpair().unwrap();

        let header = Header::new(payload.len() as u32, Flags::NONE);
        send_with_fds(&local, &header.encode(), &[]).unwrap();
        send_with_fds(&local, &payload, &[]).unwrap();

        let mut header_buf = [0u8; HEADER_LEN];
        let mut fd_buf = [0; 16];
        let (n, nfds) = recv_with_fds(&peer, &mut header_buf, &mut fd_buf).unwrap();
        prop_assert_eq!(n, HEADER_LEN);
        prop_assert_eq!(nfds, 0);
        let decoded_header = Header::decode(&header_buf).unwrap();
        prop_assert_eq!(decoded_header, header);

        let mut payload_buf = vec![0u8; decoded_header.length as usize];
        (&peer).read_exact(&mut payload_buf).unwrap();
        prop_assert_eq!(payload_buf, payload);
    }
}

#[test]
fn fds_pass_through_scm_rights() {
    let (local, peer) = socketpair().unwrap();
    let (donor_a, _donor_b) = socketpair().unwrap();

    send_with_fds(&local, b"hdr", &[donor_a.as_raw_fd()]).unwrap();

    let mut buf = [0u8; 3];
    let mut fd_buf = [0; 16];
    let (n, nfds) = recv_with_fds(&peer, &mut buf, &mut fd_buf).unwrap();
    assert_eq!(n, 3);
    assert_eq!(nfds, 1);
    // SCM_RIGHTS dups on receipt: a distinct, still-open descriptor.
    assert_ne!(fd_buf[0], donor_a.as_raw_fd());
}
