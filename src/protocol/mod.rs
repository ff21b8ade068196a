//! MySQL client/server wire protocol pieces used by the router.
//!
//! Only the replication-facing subset is implemented: command packet
//! construction, packet reassembly over fragmented deliveries, and
//! replication event header decoding. Event payloads pass through opaque
//! except for the rotate event.

pub mod assembly;
pub mod codec;
pub mod event;

pub use assembly::PacketAssembler;
pub use codec::{encode_value, extract_field};
pub use event::ReplicationHeader;

/// MySQL packet header: 3-byte payload length + 1-byte sequence id.
pub const PACKET_HEADER_LEN: usize = 4;

/// Command bytes sent to the master.
pub mod commands {
    /// COM_QUERY: text query
    pub const COM_QUERY: u8 = 0x03;
    /// COM_REGISTER_SLAVE: announce ourselves as a replica
    pub const COM_REGISTER_SLAVE: u8 = 0x15;
    /// COM_BINLOG_DUMP: request the binlog stream
    pub const COM_BINLOG_DUMP: u8 = 0x12;
}

/// First payload byte of a MySQL error packet.
pub const ERR_PACKET_MARKER: u8 = 0xff;
