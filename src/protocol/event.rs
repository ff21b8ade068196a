//! Replication event framing.
//!
//! Every binlog event arrives wrapped in a MySQL packet whose payload is an
//! OK byte followed by the 19-byte event header and the event body. Only
//! the header is interpreted here; bodies pass through opaque except for
//! the rotate event, which the router must read to follow file changes.

use super::{codec::extract_field, ERR_PACKET_MARKER, PACKET_HEADER_LEN};
use crate::error::ProtocolError;
use crate::BINLOG_FNAMELEN;

/// Size of the replication event header.
pub const EVENT_HEADER_LEN: usize = 19;

/// Offset of the event bytes inside the enclosing MySQL packet
/// (4 framing bytes + the OK byte).
pub const EVENT_OFFSET: usize = PACKET_HEADER_LEN + 1;

/// Event type codes interpreted by the router (MySQL 5.6 numbering).
pub const ROTATE_EVENT: u8 = 0x04;
/// Format description event; first event of every binlog file.
pub const FORMAT_DESCRIPTION_EVENT: u8 = 0x0f;
/// Keep-alive sent by an idle master.
pub const HEARTBEAT_EVENT: u8 = 0x1b;

/// Number of distinct event types in the MySQL 5.6 table.
pub const EVENT_TYPE_COUNT: usize = 0x24;

/// Header flag marking an event as artificial (informational only, not
/// part of the logical stream).
pub const LOG_EVENT_ARTIFICIAL_F: u16 = 0x0020;

/// Parsed framing and event header of one replication packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationHeader {
    /// MySQL packet payload length
    pub payload_len: u32,
    /// MySQL packet sequence id
    pub seqno: u8,
    /// First payload byte; 0 for data, anything else marks an error packet
    pub ok: u8,
    /// Event timestamp (seconds)
    pub timestamp: u32,
    /// Event type code
    pub event_type: u8,
    /// Server id of the originating master
    pub server_id: u32,
    /// Total event size, header included
    pub event_size: u32,
    /// Offset of the next event in the binlog file
    pub next_pos: u32,
    /// Event flags
    pub flags: u16,
}

impl ReplicationHeader {
    /// Parse the framing and event header from the start of a MySQL packet.
    ///
    /// Requires the 4 framing bytes, the OK byte and the full 19-byte
    /// event header to be present.
    pub fn parse(pkt: &[u8]) -> Result<Self, ProtocolError> {
        const NEEDED: usize = EVENT_OFFSET + EVENT_HEADER_LEN;
        if pkt.len() < NEEDED {
            return Err(ProtocolError::Truncated {
                needed: NEEDED,
                have: pkt.len(),
            });
        }
        Ok(Self {
            payload_len: extract_field(&pkt[0..], 24),
            seqno: pkt[3],
            ok: pkt[4],
            timestamp: extract_field(&pkt[5..], 32),
            event_type: pkt[9],
            server_id: extract_field(&pkt[10..], 32),
            event_size: extract_field(&pkt[14..], 32),
            next_pos: extract_field(&pkt[18..], 32),
            flags: extract_field(&pkt[22..], 16) as u16,
        })
    }

    /// Returns true if the artificial flag is set.
    #[inline]
    pub fn is_artificial(&self) -> bool {
        self.flags & LOG_EVENT_ARTIFICIAL_F != 0
    }

    /// Slice the raw event (header plus body) out of its enclosing packet.
    pub fn event_bytes<'a>(&self, pkt: &'a [u8]) -> Result<&'a [u8], ProtocolError> {
        pkt.get(EVENT_OFFSET..EVENT_OFFSET + self.event_size as usize)
            .ok_or(ProtocolError::EventOverrun {
                event_size: self.event_size as usize,
                available: pkt.len().saturating_sub(EVENT_OFFSET),
            })
    }

    /// Binlog offset this event was read from, if the header carries one.
    ///
    /// Fake events report `next_pos == 0` and have no position.
    #[inline]
    pub fn start_pos(&self) -> Option<u64> {
        u64::from(self.next_pos).checked_sub(u64::from(self.event_size))
    }
}

/// Contents of a rotate event: the next binlog file and its start offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rotate {
    /// Name of the next binlog file
    pub name: String,
    /// Offset at which the next file begins
    pub position: u64,
}

impl Rotate {
    /// Parse a rotate event given the raw event bytes (19-byte header plus
    /// body). The body is a 64-bit position in two little-endian halves
    /// followed by the file name, capped at [`BINLOG_FNAMELEN`].
    pub fn parse(event: &[u8]) -> Result<Self, ProtocolError> {
        if event.len() < EVENT_HEADER_LEN + 8 {
            return Err(ProtocolError::MalformedRotate(
                event.len().saturating_sub(EVENT_HEADER_LEN),
            ));
        }
        let body = &event[EVENT_HEADER_LEN..];
        let position =
            u64::from(extract_field(body, 32)) | u64::from(extract_field(&body[4..], 32)) << 32;
        let raw_name = &body[8..body.len().min(8 + BINLOG_FNAMELEN)];
        let end = raw_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(raw_name.len());
        let name = String::from_utf8_lossy(&raw_name[..end]).into_owned();
        Ok(Self { name, position })
    }
}

/// Returns true if the packet carries the MySQL error marker.
#[inline]
pub fn is_error_packet(pkt: &[u8]) -> bool {
    pkt.get(PACKET_HEADER_LEN) == Some(&ERR_PACKET_MARKER)
}

/// Decode the server error code and message from an error packet.
///
/// The code is the 16-bit field after the marker; the human-readable
/// message begins at byte 7 of the packet.
pub fn parse_error_packet(pkt: &[u8]) -> Result<(u16, String), ProtocolError> {
    if !is_error_packet(pkt) {
        return Err(ProtocolError::NotAnError);
    }
    if pkt.len() < 7 {
        return Err(ProtocolError::Truncated {
            needed: 7,
            have: pkt.len(),
        });
    }
    let code = extract_field(&pkt[5..], 16) as u16;
    let message = String::from_utf8_lossy(&pkt[7..])
        .trim_end_matches('\0')
        .to_string();
    Ok((code, message))
}

/// Build a full event packet (MySQL framing, OK byte, 19-byte header,
/// then `body`) for use in tests across the crate.
#[cfg(test)]
pub(crate) fn event_packet_bytes(
    event_type: u8,
    server_id: u32,
    next_pos: u32,
    flags: u16,
    body: &[u8],
    seqno: u8,
) -> Vec<u8> {
    use bytes::{BufMut, BytesMut};

    let event_size = (EVENT_HEADER_LEN + body.len()) as u32;
    let mut buf = BytesMut::new();
    let payload_len = 1 + event_size;
    buf.put_u8((payload_len & 0xff) as u8);
    buf.put_u8(((payload_len >> 8) & 0xff) as u8);
    buf.put_u8(((payload_len >> 16) & 0xff) as u8);
    buf.put_u8(seqno);
    buf.put_u8(0); // OK
    buf.put_u32_le(1_700_000_000); // timestamp
    buf.put_u8(event_type);
    buf.put_u32_le(server_id);
    buf.put_u32_le(event_size);
    buf.put_u32_le(next_pos);
    buf.put_u16_le(flags);
    buf.put_slice(body);
    buf.to_vec()
}
