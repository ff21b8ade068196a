//! Downstream replica bookkeeping.

use super::Link;
use crate::error::Result;
use crate::protocol::codec;
use crate::protocol::event::Rotate;
use std::sync::Arc;
use tracing::warn;

/// One downstream replica currently served by the router.
///
/// Entries are created when a replica finishes registering (outside this
/// core) and removed on its disconnect. The distributor walks them under
/// the instance lock, so the fields need no synchronization of their own.
pub struct Slave {
    /// Server id the replica registered with
    pub server_id: u32,
    /// Connection handle to the replica
    conn: Arc<dyn Link>,
    /// Binlog file the replica is reading
    pub binlog_name: String,
    /// Next binlog offset the replica expects
    pub binlog_pos: u64,
    /// Sequence id for the next outbound packet
    seqno: u8,
}

impl Slave {
    /// Create an entry for a replica expecting `binlog_name:binlog_pos`.
    pub fn new(server_id: u32, conn: Arc<dyn Link>, binlog_name: String, binlog_pos: u64) -> Self {
        Self {
            server_id,
            conn,
            binlog_name,
            binlog_pos,
            seqno: 1,
        }
    }

    /// Sequence id the next packet will carry.
    pub fn seqno(&self) -> u8 {
        self.seqno
    }

    /// Re-frame `event` as a MySQL packet and send it, consuming one
    /// sequence id.
    pub fn send_event(&mut self, event: &[u8]) -> Result<()> {
        let pkt = codec::event_packet(event, self.seqno);
        self.seqno = self.seqno.wrapping_add(1);
        self.conn.write(pkt)
    }

    /// Rotate hook: move this replica's file tracking to the file named by
    /// a rotate event it was just sent.
    pub fn rotate(&mut self, event: &[u8]) {
        match Rotate::parse(event) {
            Ok(rotate) => {
                self.binlog_name = rotate.name;
                self.binlog_pos = rotate.position;
            }
            Err(e) => {
                warn!(server_id = self.server_id, error = %e, "bad rotate event for slave");
            }
        }
    }

    /// Close the replica connection.
    pub fn close(&self) {
        self.conn.close();
    }
}

impl std::fmt::Debug for Slave {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slave")
            .field("server_id", &self.server_id)
            .field("binlog_name", &self.binlog_name)
            .field("binlog_pos", &self.binlog_pos)
            .field("seqno", &self.seqno)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CaptureLink {
        sent: Mutex<Vec<Bytes>>,
    }

    impl Link for CaptureLink {
        fn write(&self, buf: Bytes) -> Result<()> {
            self.sent.lock().push(buf);
            Ok(())
        }

        fn close(&self) {}
    }

    #[test]
    fn test_send_event_frames_and_advances_seqno() {
        let link = Arc::new(CaptureLink::default());
        let mut slave = Slave::new(7, link.clone(), "mysql-bin.000001".into(), 4);

        let event = [0x11u8; 25];
        slave.send_event(&event).unwrap();
        slave.send_event(&event).unwrap();

        let sent = link.sent.lock();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0][3], 1);
        assert_eq!(sent[1][3], 2);
        assert_eq!(&sent[0][5..], &event);
        assert_eq!(slave.seqno(), 3);
    }

    #[test]
    fn test_seqno_wraps_modulo_256() {
        let link = Arc::new(CaptureLink::default());
        let mut slave = Slave::new(7, link.clone(), "mysql-bin.000001".into(), 4);
        slave.seqno = 255;

        slave.send_event(&[0u8; 19]).unwrap();
        slave.send_event(&[0u8; 19]).unwrap();

        let sent = link.sent.lock();
        assert_eq!(sent[0][3], 255);
        assert_eq!(sent[1][3], 0);
    }

    #[test]
    fn test_rotate_hook_moves_tracking() {
        let link = Arc::new(CaptureLink::default());
        let mut slave = Slave::new(7, link, "mysql-bin.000001".into(), 1050);

        let mut event = vec![0u8; 19];
        event.extend_from_slice(&4u64.to_le_bytes());
        event.extend_from_slice(b"mysql-bin.000002");
        slave.rotate(&event);

        assert_eq!(slave.binlog_name, "mysql-bin.000002");
        assert_eq!(slave.binlog_pos, 4);
    }

    #[test]
    fn test_bad_rotate_leaves_tracking_alone() {
        let link = Arc::new(CaptureLink::default());
        let mut slave = Slave::new(7, link, "mysql-bin.000001".into(), 1050);

        slave.rotate(&[0u8; 10]);

        assert_eq!(slave.binlog_name, "mysql-bin.000001");
        assert_eq!(slave.binlog_pos, 1050);
    }
}
