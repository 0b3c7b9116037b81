//! `AF_UNIX` `SOCK_STREAM` socketpair construction for a port's two ends
//! (`Port::get_socket_pair`).

use std::os::unix::net::UnixStream;

use socket2::{Domain, Socket, Type};

use crate::error::{PortError, Result};

/// Create a connected pair of `AF_UNIX` `SOCK_STREAM` sockets.
///
/// Returns `(local, peer)`: `local` is retained by the owning [`crate::port::Port`],
/// `peer` is handed to whoever asked for the socket pair.
pub fn socketpair() -> Result<(UnixStream, UnixStream)> {
    let (a, b) = Socket::pair(Domain::UNIX, Type::STREAM, None)
        .map_err(pinos_core::error::Error::IoError)
        .map_err(PortError::Core)?;
    Ok((UnixStream::from(a), UnixStream::from(b)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn pair_is_connected() {
        let (mut a, mut b) = socketpair().unwrap();
        a.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }
}
