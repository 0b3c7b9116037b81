//! Wire header for one frame.
//!
//! Each frame on the wire is a fixed header — payload length and flags — sent
//! together with `SCM_RIGHTS` ancillary data, followed by exactly `length` bytes
//! of payload on the same stream.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{PortError, Result};

/// Size of the encoded header in bytes: a `u32` length, a `u32` flags word.
pub const HEADER_LEN: usize = 8;

/// Per-frame flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u32);

impl Flags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// The payload carries control packets rather than raw media.
    pub const CONTROL: Self = Self(1 << 0);

    /// Whether `CONTROL` is set.
    #[must_use]
    pub const fn is_control(self) -> bool {
        self.0 & Self::CONTROL.0 != 0
    }

    /// Bitwise-or two flag sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    const fn bits(self) -> u32 {
        self.0
    }
}

/// Fixed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Payload length in bytes.
    pub length: u32,
    /// Per-frame flags.
    pub flags: Flags,
}

impl Header {
    /// Build a header for a payload of `length` bytes with `flags`.
    #[must_use]
    pub fn new(length: u32, flags: Flags) -> Self {
        Self { length, flags }
    }

    /// Encode into the fixed wire representation.
    #[must_use]
    pub fn encode(self) -> [u8; HEADER_LEN] {
        let mut buf = BytesMut::with_capacity(HEADER_LEN);
        buf.put_u32_le(self.length);
        buf.put_u32_le(self.flags.bits());
        let mut out = [0u8; HEADER_LEN];
        out.copy_from_slice(&buf);
        out
    }

    /// Decode from exactly `HEADER_LEN` bytes.
    pub fn decode(mut bytes: &[u8]) -> Result<Self> {
        if bytes.len() != HEADER_LEN {
            return Err(PortError::protocol(format!(
                "short header: expected {HEADER_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let length = bytes.get_u32_le();
        let flags = Flags::from_bits(bytes.get_u32_le());
        Ok(Self { length, flags })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_wire_bytes() {
        let header = Header::new(42, Flags::CONTROL);
        let encoded = header.encode();
        let decoded = Header::decode(&encoded).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.flags.is_control());
    }

    #[test]
    fn rejects_short_header() {
        assert!(Header::decode(&[0u8; 4]).is_err());
    }
}
