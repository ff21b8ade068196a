//! Outbound MySQL packet construction.
//!
//! A MySQL client packet is a 3-byte little-endian payload length, a 1-byte
//! sequence id, then the payload. The router only ever sends three commands
//! upstream (query, register-slave, binlog-dump) and one synthesized packet
//! downstream (a replication event re-framed for a slave), so the builders
//! live here rather than behind a general command layer.

use super::commands::{COM_BINLOG_DUMP, COM_QUERY, COM_REGISTER_SLAVE};
use crate::BINLOG_FNAMELEN;
use bytes::{BufMut, Bytes, BytesMut};

/// Append `value` to `buf` as a little-endian field of `bits` width.
///
/// `bits` must be a multiple of 8; widths of 8, 16, 24 and 32 cover every
/// field in the replication dialect. 64-bit values are written as two
/// 32-bit halves by the callers that need them.
#[inline]
pub fn encode_value(buf: &mut BytesMut, value: u32, bits: u32) {
    let mut value = value;
    let mut bits = bits;
    while bits > 0 {
        buf.put_u8((value & 0xff) as u8);
        value >>= 8;
        bits -= 8;
    }
}

/// Read a little-endian field of `bits` width from the front of `src`.
///
/// Inverse of [`encode_value`]. Callers are responsible for ensuring `src`
/// holds at least `bits / 8` bytes; 64-bit fields are composed from two
/// 32-bit extractions.
#[inline]
pub fn extract_field(src: &[u8], bits: u32) -> u32 {
    let mut value = 0u32;
    let mut shift = 0;
    let mut bits = bits;
    let mut idx = 0;
    while bits > 0 {
        value |= u32::from(src[idx]) << shift;
        idx += 1;
        shift += 8;
        bits -= 8;
    }
    value
}

/// Build a COM_QUERY packet for `sql`.
///
/// The length field counts the command byte plus the query text; the text
/// itself carries no trailing NUL. Sequence id is always 0 since each
/// probe starts a fresh command sequence.
pub fn query_packet(sql: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(sql.len() + 5);
    encode_value(&mut buf, sql.len() as u32 + 1, 24);
    buf.put_u8(0);
    buf.put_u8(COM_QUERY);
    buf.put_slice(sql.as_bytes());
    buf.freeze()
}

/// Build a COM_REGISTER_SLAVE packet announcing this router to the master.
///
/// Hostname, user and password lengths are zero (the master does not need
/// them to accept the registration) and the replication rank is always 0.
pub fn register_slave_packet(server_id: u32, port: u16, master_id: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(22);
    encode_value(&mut buf, 18, 24); // payload length
    buf.put_u8(0); // sequence id
    buf.put_u8(COM_REGISTER_SLAVE);
    encode_value(&mut buf, server_id, 32); // our server id
    buf.put_u8(0); // hostname length
    buf.put_u8(0); // username length
    buf.put_u8(0); // password length
    encode_value(&mut buf, u32::from(port), 16); // slave-facing port
    encode_value(&mut buf, 0, 32); // replication rank
    encode_value(&mut buf, master_id, 32);
    buf.freeze()
}

/// Build a COM_BINLOG_DUMP packet requesting the stream from
/// `binlog_name` at `position`.
///
/// The dump position is a 32-bit field on the wire; positions above 4 GiB
/// cannot be requested. Names longer than [`BINLOG_FNAMELEN`] are
/// truncated to the wire maximum.
pub fn binlog_dump_packet(position: u64, server_id: u32, binlog_name: &str) -> Bytes {
    let name = &binlog_name.as_bytes()[..binlog_name.len().min(BINLOG_FNAMELEN)];
    let payload_len = 11 + name.len();
    let mut buf = BytesMut::with_capacity(payload_len + 4);
    encode_value(&mut buf, payload_len as u32, 24);
    buf.put_u8(0); // sequence id
    buf.put_u8(COM_BINLOG_DUMP);
    encode_value(&mut buf, position as u32, 32);
    encode_value(&mut buf, 0, 16); // flags
    encode_value(&mut buf, server_id, 32);
    buf.put_slice(name);
    buf.freeze()
}

/// Re-frame a raw replication event as the MySQL packet a slave expects.
///
/// The payload is the OK byte followed by the untouched event bytes, so
/// the packet is `event.len() + 5` bytes in total.
pub fn event_packet(event: &[u8], seqno: u8) -> Bytes {
    let mut buf = BytesMut::with_capacity(event.len() + 5);
    encode_value(&mut buf, event.len() as u32 + 1, 24);
    buf.put_u8(seqno);
    buf.put_u8(0); // OK
    buf.put_slice(event);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_extract_inverse() {
        for bits in [8u32, 16, 24, 32] {
            let mask = if bits == 32 { u32::MAX } else { (1 << bits) - 1 };
            for value in [0u32, 1, 0xfe, 0x1234, 0xabcdef, 0xdead_beef] {
                let value = value & mask;
                let mut buf = BytesMut::new();
                encode_value(&mut buf, value, bits);
                assert_eq!(buf.len(), bits as usize / 8);
                assert_eq!(extract_field(&buf, bits), value);
            }
        }
    }

    #[test]
    fn test_encode_is_little_endian() {
        let mut buf = BytesMut::new();
        encode_value(&mut buf, 0x0012_3456, 24);
        assert_eq!(&buf[..], &[0x56, 0x34, 0x12]);
    }

    #[test]
    fn test_query_packet_layout() {
        let pkt = query_packet("SELECT UNIX_TIMESTAMP()");
        // 23 bytes of text + 1 command byte
        assert_eq!(&pkt[0..3], &[24, 0, 0]);
        assert_eq!(pkt[3], 0); // sequence id
        assert_eq!(pkt[4], COM_QUERY);
        assert_eq!(&pkt[5..], b"SELECT UNIX_TIMESTAMP()");
    }

    #[test]
    fn test_register_slave_packet_layout() {
        let pkt = register_slave_packet(0x0a0b0c0d, 3307, 0x01020304);
        assert_eq!(pkt.len(), 22);
        assert_eq!(&pkt[0..3], &[18, 0, 0]);
        assert_eq!(pkt[3], 0);
        assert_eq!(pkt[4], COM_REGISTER_SLAVE);
        assert_eq!(&pkt[5..9], &[0x0d, 0x0c, 0x0b, 0x0a]); // server id
        assert_eq!(&pkt[9..12], &[0, 0, 0]); // hostname/user/password lengths
        assert_eq!(&pkt[12..14], &(3307u16.to_le_bytes())); // port
        assert_eq!(&pkt[14..18], &[0, 0, 0, 0]); // rank
        assert_eq!(&pkt[18..22], &[0x04, 0x03, 0x02, 0x01]); // master id
    }

    #[test]
    fn test_binlog_dump_packet_layout() {
        let pkt = binlog_dump_packet(4, 99, "mysql-bin.000001");
        // default 16-char name: payload is 0x1b bytes
        assert_eq!(&pkt[0..3], &[0x1b, 0, 0]);
        assert_eq!(pkt[3], 0);
        assert_eq!(pkt[4], COM_BINLOG_DUMP);
        assert_eq!(&pkt[5..9], &[4, 0, 0, 0]); // position
        assert_eq!(&pkt[9..11], &[0, 0]); // flags
        assert_eq!(&pkt[11..15], &[99, 0, 0, 0]); // server id
        assert_eq!(&pkt[15..], b"mysql-bin.000001");
    }

    #[test]
    fn test_binlog_dump_packet_truncates_long_name() {
        let long = "x".repeat(BINLOG_FNAMELEN + 10);
        let pkt = binlog_dump_packet(4, 1, &long);
        assert_eq!(pkt.len(), 4 + 11 + BINLOG_FNAMELEN);
    }

    #[test]
    fn test_event_packet_layout() {
        let event = [0xaau8; 30];
        let pkt = event_packet(&event, 7);
        assert_eq!(pkt.len(), 35);
        assert_eq!(&pkt[0..3], &[31, 0, 0]); // event len + OK byte
        assert_eq!(pkt[3], 7); // sequence id
        assert_eq!(pkt[4], 0); // OK
        assert_eq!(&pkt[5..], &event);
    }
}
