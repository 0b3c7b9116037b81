//! Framed buffers exchanged over a port's socket.

use std::os::unix::io::RawFd;

use bytes::Bytes;
use smallvec::SmallVec;

use crate::header::{Flags, Header};

/// Maximum file descriptors a single buffer may carry (mirrors
/// [`pinos_core::fdpass::MAX_FDS`]).
pub const MAX_FDS: usize = pinos_core::fdpass::MAX_FDS;

/// A received or about-to-be-sent frame: header, payload, and any passed fds.
///
/// Mirrors the refcounted buffer of the original object model, but leans on
/// `Bytes`' atomic refcounting instead of a bespoke counter: cloning a `Buffer`
/// is cheap and shares the underlying payload allocation.
#[derive(Debug, Clone)]
pub struct Buffer {
    header: Header,
    payload: Bytes,
    fds: SmallVec<[RawFd; 4]>,
}

impl Buffer {
    /// Build a plain media buffer (no `Control` flag).
    #[must_use]
    pub fn new(payload: impl Into<Bytes>, fds: impl Into<SmallVec<[RawFd; 4]>>) -> Self {
        let payload = payload.into();
        let fds = fds.into();
        Self {
            header: Header::new(payload.len() as u32, Flags::NONE),
            payload,
            fds,
        }
    }

    /// Build a control buffer carrying an encoded control payload.
    #[must_use]
    pub fn control(payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        Self {
            header: Header::new(payload.len() as u32, Flags::CONTROL),
            payload,
            fds: SmallVec::new(),
        }
    }

    /// Reassemble a buffer from a decoded header, payload bytes, and the fds
    /// decoded alongside it by [`pinos_core::fdpass::recv_with_fds`].
    #[must_use]
    pub fn from_wire(header: Header, payload: Bytes, fds: SmallVec<[RawFd; 4]>) -> Self {
        Self { header, payload, fds }
    }

    /// The frame header (length must always match `payload.len()`).
    #[must_use]
    pub fn header(&self) -> Header {
        Header::new(self.payload.len() as u32, self.header.flags)
    }

    /// Whether this buffer carries control packets rather than media.
    #[must_use]
    pub fn is_control(&self) -> bool {
        self.header.flags.is_control()
    }

    /// The payload bytes.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// The file descriptors carried alongside this buffer.
    #[must_use]
    pub fn fds(&self) -> &[RawFd] {
        &self.fds
    }

    /// Whether this buffer's payload allocation is uniquely held.
    ///
    /// `Buffer` leans on `Bytes`' atomic refcounting instead of a bespoke
    /// counter; this is `true` once the last peer forwarding a clone has
    /// dropped it, i.e. once the original model's refcount would read 1.
    #[must_use]
    pub fn is_uniquely_held(&self) -> bool {
        self.payload.clone().try_into_mut().is_ok()
    }
}
