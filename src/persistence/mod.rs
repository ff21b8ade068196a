//! Local binlog persistence.
//!
//! The router journals every ordinary replication event to a local copy of
//! the master's binlog so that out-of-core readers can serve slaves that
//! fall behind the live stream.

mod binlog;

pub use binlog::{BinlogFile, BinlogStore};
