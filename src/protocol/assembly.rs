//! Packet reassembly over fragmented network deliveries.
//!
//! Bytes from the master arrive as a sequence of segments of arbitrary
//! length; MySQL packet boundaries do not respect segment boundaries. The
//! assembler owns whatever has not yet formed a whole packet and yields
//! packets one at a time:
//!
//! - a packet lying entirely inside the head segment is sliced out without
//!   copying;
//! - a packet spanning segments is copied into a fresh contiguous buffer;
//! - when the buffered bytes cannot form a whole packet, extraction stops
//!   and the remainder is carried as the residual for the next delivery.
//!
//! The residual is always a strict prefix of the next undelivered packet.

use super::PACKET_HEADER_LEN;
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use tracing::debug;

/// Streaming MySQL packet assembler.
///
/// # Usage
///
/// ```ignore
/// assembler.push(segment);
/// while let Some(pkt) = assembler.next_packet() {
///     // pkt is one whole MySQL packet, header included
/// }
/// ```
#[derive(Debug, Default)]
pub struct PacketAssembler {
    chain: VecDeque<Bytes>,
    buffered: usize,
}

impl PacketAssembler {
    /// Create an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one delivered segment to the chain.
    pub fn push(&mut self, segment: Bytes) {
        if segment.is_empty() {
            return;
        }
        self.buffered += segment.len();
        self.chain.push_back(segment);
    }

    /// Number of bytes currently buffered.
    #[inline]
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    /// Returns true if no residual bytes are held.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffered == 0
    }

    /// Extract the next whole packet, or `None` if the chain does not hold
    /// one yet. What remains after `None` is the residual.
    pub fn next_packet(&mut self) -> Option<Bytes> {
        let target = self.target_len()?;
        if self.buffered < target {
            return None;
        }

        let head_len = self.chain.front().map(Bytes::len).unwrap_or(0);
        if head_len >= target {
            // Whole packet inside the head segment: point at it in place.
            let head = self.chain.front_mut().expect("chain non-empty");
            let pkt = head.split_to(target);
            if head.is_empty() {
                self.chain.pop_front();
            }
            self.buffered -= target;
            return Some(pkt);
        }

        // Packet spans segments; copy into a contiguous buffer.
        let mut spanned = 0usize;
        let mut pkt = BytesMut::with_capacity(target);
        let mut remaining = target;
        while remaining > 0 {
            let head = self.chain.front_mut().expect("buffered >= target");
            let take = head.len().min(remaining);
            pkt.extend_from_slice(&head.split_to(take));
            if head.is_empty() {
                self.chain.pop_front();
            }
            remaining -= take;
            spanned += 1;
        }
        if spanned > 2 {
            debug!(len = target, segments = spanned, "packet spans more than 2 buffers");
        }
        self.buffered -= target;
        Some(pkt.freeze())
    }

    /// Whole-packet length (header included), reading the 24-bit length
    /// field byte-by-byte across segment boundaries when necessary.
    fn target_len(&self) -> Option<usize> {
        if self.buffered < 3 {
            return None;
        }
        let mut len = 0usize;
        let mut needed = 3;
        let mut shift = 0;
        for segment in &self.chain {
            for &b in segment.iter().take(needed) {
                len |= usize::from(b) << shift;
                shift += 8;
                needed -= 1;
            }
            if needed == 0 {
                break;
            }
        }
        Some(len + PACKET_HEADER_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Frame `payload` as a MySQL packet with the given sequence id.
    pub(super) fn packet(payload: &[u8], seqno: u8) -> Vec<u8> {
        let mut pkt = vec![
            (payload.len() & 0xff) as u8,
            ((payload.len() >> 8) & 0xff) as u8,
            ((payload.len() >> 16) & 0xff) as u8,
            seqno,
        ];
        pkt.extend_from_slice(payload);
        pkt
    }

    #[test]
    fn test_single_segment_single_packet() {
        let pkt = packet(b"hello", 0);
        let mut asm = PacketAssembler::new();
        asm.push(Bytes::copy_from_slice(&pkt));
        assert_eq!(asm.next_packet().unwrap(), &pkt[..]);
        assert!(asm.next_packet().is_none());
        assert!(asm.is_empty());
    }

    #[test]
    fn test_two_packets_in_one_segment() {
        let a = packet(b"first", 0);
        let b = packet(b"second", 1);
        let mut joined = a.clone();
        joined.extend_from_slice(&b);

        let mut asm = PacketAssembler::new();
        asm.push(Bytes::from(joined));
        assert_eq!(asm.next_packet().unwrap(), &a[..]);
        assert_eq!(asm.next_packet().unwrap(), &b[..]);
        assert!(asm.next_packet().is_none());
    }

    #[test]
    fn test_split_1_2_90_11() {
        // One packet of payload length 100, split into segments of
        // 1, 2, 90 and 11 bytes across four deliveries.
        let payload: Vec<u8> = (0..100u8).collect();
        let pkt = packet(&payload, 3);
        assert_eq!(pkt.len(), 104);

        let mut asm = PacketAssembler::new();
        for (start, end) in [(0usize, 1usize), (1, 3), (3, 93), (93, 104)] {
            assert!(asm.next_packet().is_none());
            asm.push(Bytes::copy_from_slice(&pkt[start..end]));
        }
        assert_eq!(asm.next_packet().unwrap(), &pkt[..]);
        assert!(asm.is_empty());
    }

    #[test]
    fn test_length_field_straddles_segments() {
        let payload = [0x55u8; 300]; // length field uses two bytes
        let pkt = packet(&payload, 0);

        let mut asm = PacketAssembler::new();
        asm.push(Bytes::copy_from_slice(&pkt[..2]));
        assert!(asm.next_packet().is_none());
        asm.push(Bytes::copy_from_slice(&pkt[2..]));
        assert_eq!(asm.next_packet().unwrap(), &pkt[..]);
    }

    #[test]
    fn test_residual_is_prefix_of_next_packet() {
        let a = packet(b"complete", 0);
        let b = packet(b"partial", 1);
        let mut delivery = a.clone();
        delivery.extend_from_slice(&b[..6]);

        let mut asm = PacketAssembler::new();
        asm.push(Bytes::from(delivery));
        assert_eq!(asm.next_packet().unwrap(), &a[..]);
        assert!(asm.next_packet().is_none());
        assert_eq!(asm.buffered(), 6);

        asm.push(Bytes::copy_from_slice(&b[6..]));
        assert_eq!(asm.next_packet().unwrap(), &b[..]);
        assert!(asm.is_empty());
    }

    #[test]
    fn test_packet_spanning_many_segments() {
        let payload = [0xabu8; 64];
        let pkt = packet(&payload, 9);

        let mut asm = PacketAssembler::new();
        for chunk in pkt.chunks(5) {
            asm.push(Bytes::copy_from_slice(chunk));
        }
        assert_eq!(asm.next_packet().unwrap(), &pkt[..]);
        assert!(asm.is_empty());
    }

    #[test]
    fn test_zero_length_payload() {
        let pkt = packet(b"", 0);
        let mut asm = PacketAssembler::new();
        asm.push(Bytes::copy_from_slice(&pkt));
        assert_eq!(asm.next_packet().unwrap(), &pkt[..]);
    }
}
