//! Control-buffer packet parsing.
//!
//! A control buffer's payload is a sequence of typed packets. The only packet
//! kind the core needs to understand is `FormatChange`; any other packet type
//! is passed through to peers unchanged but not otherwise inspected.

use bytes::{Buf, Bytes};

use crate::buffer::Buffer;
use crate::error::{PortError, Result};

const PACKET_FORMAT_CHANGE: u8 = 1;

/// A decoded control packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPacket {
    /// The port's negotiated format changed.
    FormatChange {
        /// An identifier for the format change, echoed back by the daemon.
        id: u32,
        /// The new format, opaque to this crate (see [`crate::format`]).
        format: String,
    },
    /// A packet type this crate does not recognize; carried through untouched.
    Unknown {
        /// The wire packet-type tag.
        kind: u8,
        /// The raw packet body.
        body: Bytes,
    },
}

/// Encode a single [`ControlPacket::FormatChange`] as a one-packet control
/// [`Buffer`]. The format string is nul-terminated on the wire, not
/// length-prefixed.
#[must_use]
pub fn format_change_buffer(id: u32, format: &str) -> Buffer {
    let mut out = Vec::with_capacity(1 + 4 + format.len() + 1);
    out.push(PACKET_FORMAT_CHANGE);
    out.extend_from_slice(&id.to_le_bytes());
    out.extend_from_slice(format.as_bytes());
    out.push(0);
    Buffer::control(Bytes::from(out))
}

/// Parse every control packet in `buf`'s payload.
///
/// Errors only on a truncated packet; an unrecognized packet type is folded
/// into [`ControlPacket::Unknown`] rather than rejected.
pub fn parse_packets(buf: &Buffer) -> Result<Vec<ControlPacket>> {
    debug_assert!(buf.is_control());
    let mut cursor = buf.payload().clone();
    let mut packets = Vec::new();

    while cursor.has_remaining() {
        if cursor.remaining() < 1 {
            return Err(PortError::protocol("truncated control packet tag"));
        }
        let kind = cursor.get_u8();
        match kind {
            PACKET_FORMAT_CHANGE => {
                if cursor.remaining() < 4 {
                    return Err(PortError::protocol("truncated FormatChange packet"));
                }
                let id = cursor.get_u32_le();
                let nul_pos = cursor
                    .chunk()
                    .iter()
                    .position(|&b| b == 0)
                    .ok_or_else(|| PortError::protocol("FormatChange format has no NUL terminator"))?;
                let format_bytes = cursor.copy_to_bytes(nul_pos);
                cursor.advance(1); // skip the NUL terminator
                let format = String::from_utf8(format_bytes.to_vec())
                    .map_err(|_| PortError::protocol("FormatChange format is not valid UTF-8"))?;
                packets.push(ControlPacket::FormatChange { id, format });
            }
            other => {
                // Unknown packets carry no declared length in this minimal
                // protocol, so we cannot skip past one safely; treat the rest
                // of the buffer as its body and stop.
                let body = cursor.copy_to_bytes(cursor.remaining());
                packets.push(ControlPacket::Unknown { kind: other, body });
            }
        }
    }
    Ok(packets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_format_change() {
        let buf = format_change_buffer(7, "audio/raw");
        let packets = parse_packets(&buf).unwrap();
        assert_eq!(
            packets,
            vec![ControlPacket::FormatChange {
                id: 7,
                format: "audio/raw".to_string(),
            }]
        );
    }

    #[test]
    fn rejects_truncated_packet() {
        let buf = Buffer::control(Bytes::from_static(&[PACKET_FORMAT_CHANGE, 0, 0]));
        assert!(parse_packets(&buf).is_err());
    }
}
