//! # Binrelay
//!
//! A MySQL binlog replication router.
//!
//! Binrelay holds a single replication connection to an upstream master,
//! journals the master's binary log locally, and re-distributes each event
//! to many downstream replicas that believe they are talking to a real
//! master: replication fan-out without N-fold load on the master.
//!
//! The crate covers:
//! - The master-side client state machine: session-variable negotiation,
//!   slave registration, and the switch into a streaming binlog dump
//! - Packet reassembly across fragmented network deliveries
//! - Local binlog persistence with rotation
//! - Per-event fan-out to position-matched replicas
//! - The serialization gate that keeps per-master processing
//!   single-threaded and in arrival order on top of a threaded runtime
//!
//! ## Example
//!
//! ```no_run
//! use binrelay::{AuthBlob, BinlogFile, Link, RouterConfig, RouterInstance};
//! use std::sync::Arc;
//!
//! fn run(master: Arc<dyn Link>) -> binrelay::Result<()> {
//!     let config = RouterConfig::default().server_id(177);
//!     let auth = AuthBlob::new(&config.user, &config.password, &config.database);
//!     let store = BinlogFile::open(&config.binlog_dir, &config.binlog_name)?;
//!     let router = RouterInstance::new(&config, auth, master, Box::new(store));
//!     router.start()?;
//!     // feed bytes from the master into router.master_response(..)
//!     Ok(())
//! }
//! ```

#![warn(
    clippy::all,
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unused_lifetimes,
    unused_qualifications
)]
#![allow(clippy::module_name_repetitions)]

// ─────────────────────────────────────────────────────────────────────────────
// Modules
// ─────────────────────────────────────────────────────────────────────────────

/// Error types and result aliases.
pub mod error;
/// Local binlog persistence.
pub mod persistence;
/// MySQL wire protocol: codec, reassembly, event framing.
pub mod protocol;
/// Router instances, slaves, registry, statistics.
pub mod router;

// ─────────────────────────────────────────────────────────────────────────────
// Common Re-exports
// ─────────────────────────────────────────────────────────────────────────────

// Error handling
pub use error::{Error, Result};

// Protocol
pub use protocol::{PacketAssembler, ReplicationHeader};

// Persistence
pub use persistence::{BinlogFile, BinlogStore};

// Router
pub use router::{
    AuthBlob, Link, MasterState, Registry, RouterConfig, RouterInstance, RouterStats,
    StatsSnapshot,
};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Crate version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum binlog file name length on the wire, null-padded.
pub const BINLOG_FNAMELEN: usize = 40;

/// Default MySQL master port.
pub const DEFAULT_MASTER_PORT: u16 = 3306;
