//! Fixed-size staging areas used by [`crate::reactor`] readiness callbacks to
//! receive one frame at a time.
//!
//! An oversize payload gets a
//! one-shot heap allocation scoped to the single buffer that needed it; the
//! port's own staging area always resumes at the fixed default afterward. There
//! is nothing to shrink because the port-level area never grew in the first
//! place.

use std::os::unix::io::RawFd;

use tracing::warn;

/// Default payload staging size in bytes.
pub const DEFAULT_STAGING_BYTES: usize = 1024;

/// Maximum number of file descriptors staged per frame.
pub const DEFAULT_STAGING_FDS: usize = 16;

/// A fixed-size reusable staging area for one socket's inbound frames.
pub struct Staging {
    bytes: Box<[u8; DEFAULT_STAGING_BYTES]>,
    fds: [RawFd; DEFAULT_STAGING_FDS],
}

impl Default for Staging {
    fn default() -> Self {
        Self {
            bytes: Box::new([0u8; DEFAULT_STAGING_BYTES]),
            fds: [-1; DEFAULT_STAGING_FDS],
        }
    }
}

/// A payload destination for one inbound frame: either a slice of the port's
/// fixed staging area, or a one-off allocation for a frame larger than the
/// default.
pub enum PayloadSlot<'a> {
    /// Borrowed from the fixed staging area.
    Inline(&'a mut [u8]),
    /// A fresh allocation sized exactly for this one oversized frame.
    Oversized(Vec<u8>),
}

impl PayloadSlot<'_> {
    /// Access the slot's bytes mutably, regardless of which variant it is.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Self::Inline(s) => s,
            Self::Oversized(v) => v.as_mut_slice(),
        }
    }

    /// Copy the slot's contents out into an owned, exactly-sized `Vec<u8>`.
    #[must_use]
    pub fn into_owned(self) -> Vec<u8> {
        match self {
            Self::Inline(s) => s.to_vec(),
            Self::Oversized(v) => v,
        }
    }
}

impl Staging {
    /// A fresh staging area with the default capacities.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a payload destination of exactly `len` bytes.
    ///
    /// Returns a borrow into the fixed area when `len` fits; otherwise
    /// reallocates once for this call only and logs a warning, per the staging
    /// policy.
    pub fn acquire_payload(&mut self, len: usize) -> PayloadSlot<'_> {
        if len <= DEFAULT_STAGING_BYTES {
            PayloadSlot::Inline(&mut self.bytes[..len])
        } else {
            warn!(
                requested = len,
                default = DEFAULT_STAGING_BYTES,
                "oversize frame, reallocating staging for this buffer only"
            );
            PayloadSlot::Oversized(vec![0u8; len])
        }
    }

    /// The fixed fd-staging array, always `DEFAULT_STAGING_FDS` long.
    pub fn fds_mut(&mut self) -> &mut [RawFd; DEFAULT_STAGING_FDS] {
        &mut self.fds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_size_stays_inline() {
        let mut staging = Staging::new();
        let slot = staging.acquire_payload(DEFAULT_STAGING_BYTES);
        assert!(matches!(slot, PayloadSlot::Inline(_)));
    }

    #[test]
    fn oversize_reallocates_once() {
        let mut staging = Staging::new();
        let slot = staging.acquire_payload(DEFAULT_STAGING_BYTES + 1);
        assert!(matches!(slot, PayloadSlot::Oversized(_)));
        // The port's own staging area is untouched; a second default-size
        // acquire still goes inline.
        let slot2 = staging.acquire_payload(DEFAULT_STAGING_BYTES);
        assert!(matches!(slot2, PayloadSlot::Inline(_)));
    }
}
