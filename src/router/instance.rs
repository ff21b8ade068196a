//! The master-side replication engine.
//!
//! One [`RouterInstance`] owns the single connection to the upstream
//! master. It drives the session-variable handshake, registers as a slave,
//! switches the connection into a binlog dump, and from then on ingests the
//! event stream: reassembling packets, journalling events locally, tracking
//! file rotation, and fanning each event out to the attached replicas.
//!
//! ## Ordering discipline
//!
//! Packets from one master must be processed strictly in arrival order, on
//! at most one thread at a time, while deliveries may come from any thread
//! of the surrounding runtime. [`RouterInstance::master_response`] gates
//! entry: the first caller marks the pipeline active and processes; callers
//! arriving while it is active append to a FIFO queue and return; the
//! active caller drains the queue before releasing the gate.

use super::config::RouterConfig;
use super::slave::Slave;
use super::stats::RouterStats;
use crate::error::Result;
use crate::persistence::BinlogStore;
use crate::protocol::assembly::PacketAssembler;
use crate::protocol::codec;
use crate::protocol::event::{
    self, ReplicationHeader, Rotate, FORMAT_DESCRIPTION_EVENT, HEARTBEAT_EVENT, ROTATE_EVENT,
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info, trace, warn};

/// Connection handle contract.
///
/// The router never touches sockets itself; whatever delivers bytes to
/// [`RouterInstance::master_response`] also supplies one of these for each
/// peer. Writes succeed or fail opaquely and never block the pipeline.
pub trait Link: Send + Sync {
    /// Queue `buf` for delivery to the peer.
    fn write(&self, buf: Bytes) -> Result<()>;

    /// Release the connection. Idempotent.
    fn close(&self);
}

/// Session authentication blob carried to the connection layer.
///
/// Produced here, consumed opaquely by the protocol module that performs
/// the MySQL login.
#[derive(Clone)]
pub struct AuthBlob {
    /// Login user
    pub user: String,
    /// Default database
    pub db: String,
    /// SHA-1 digest of the password
    pub password_sha1: [u8; 20],
}

impl AuthBlob {
    /// Digest `password` and bundle the session credentials.
    pub fn new(user: &str, password: &str, db: &str) -> Self {
        use sha1::{Digest, Sha1};
        let mut hasher = Sha1::new();
        hasher.update(password.as_bytes());
        Self {
            user: user.to_string(),
            db: db.to_string(),
            password_sha1: hasher.finalize().into(),
        }
    }
}

impl std::fmt::Debug for AuthBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthBlob")
            .field("user", &self.user)
            .field("db", &self.db)
            .finish_non_exhaustive()
    }
}

/// Master connection state machine states, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MasterState {
    /// Logged in, no probe sent yet
    Authenticated,
    /// Waiting for `SELECT UNIX_TIMESTAMP()`
    Timestamp,
    /// Waiting for `SHOW VARIABLES LIKE 'SERVER_ID'`
    ServerId,
    /// Waiting for the heartbeat period ack
    HeartbeatPeriod,
    /// Waiting for the binlog checksum assignment ack
    Checksum1,
    /// Waiting for `SELECT @master_binlog_checksum`
    Checksum2,
    /// Waiting for `SELECT @@GLOBAL.GTID_MODE`
    GtidMode,
    /// Waiting for `SHOW VARIABLES LIKE 'SERVER_UUID'`
    MasterUuid,
    /// Waiting for the `@slave_uuid` assignment ack
    SlaveUuid,
    /// Waiting for the `SET NAMES latin1` ack
    Latin1,
    /// Slave registration sent
    Register,
    /// Streaming binlog events (terminal)
    BinlogDump,
}

impl MasterState {
    /// Short name used in log lines.
    pub fn name(self) -> &'static str {
        match self {
            Self::Authenticated => "authenticated",
            Self::Timestamp => "timestamp",
            Self::ServerId => "serverid",
            Self::HeartbeatPeriod => "hbperiod",
            Self::Checksum1 => "chksum1",
            Self::Checksum2 => "chksum2",
            Self::GtidMode => "gtidmode",
            Self::MasterUuid => "muuid",
            Self::SlaveUuid => "suuid",
            Self::Latin1 => "latin1",
            Self::Register => "register",
            Self::BinlogDump => "binlogdump",
        }
    }
}

/// Responses retained from the handshake.
///
/// Newly attaching slaves are shown these verbatim (by out-of-core code)
/// so they see the same server fingerprint the router saw. The timestamp
/// probe's response carries nothing worth replaying and is dropped.
#[derive(Debug, Default)]
pub struct SavedMaster {
    /// `SHOW VARIABLES LIKE 'SERVER_ID'` resultset
    pub server_id: Option<Bytes>,
    /// Heartbeat period ack
    pub heartbeat: Option<Bytes>,
    /// Binlog checksum assignment ack
    pub chksum1: Option<Bytes>,
    /// `SELECT @master_binlog_checksum` resultset
    pub chksum2: Option<Bytes>,
    /// GTID mode resultset
    pub gtid_mode: Option<Bytes>,
    /// `SHOW VARIABLES LIKE 'SERVER_UUID'` resultset
    pub uuid: Option<Bytes>,
    /// `@slave_uuid` assignment ack
    pub setslaveuuid: Option<Bytes>,
    /// `SET NAMES latin1` ack
    pub setnames: Option<Bytes>,
    /// Payload of the fake format description event
    pub fde_event: Option<Bytes>,
}

/// State only ever touched by the thread holding the gate.
struct MasterSession {
    state: MasterState,
    assembler: PacketAssembler,
    saved: SavedMaster,
    binlog_name: String,
    binlog_position: u64,
    master_id: u32,
    store: Box<dyn BinlogStore>,
}

/// State shared with arbitrary threads, behind the instance lock.
#[derive(Default)]
struct Shared {
    active_logs: bool,
    queue: VecDeque<Bytes>,
    slaves: Vec<Slave>,
}

/// One replication router: a single master connection fanned out to many
/// downstream replicas.
pub struct RouterInstance {
    server_id: u32,
    port: u16,
    uuid: String,
    auth: AuthBlob,
    master: Arc<dyn Link>,
    lock: Mutex<Shared>,
    session: Mutex<MasterSession>,
    stats: RouterStats,
}

impl RouterInstance {
    /// Create an instance replicating from the configured master, using
    /// `master` for upstream writes and `store` for the local binlog.
    pub fn new(
        config: &RouterConfig,
        auth: AuthBlob,
        master: Arc<dyn Link>,
        store: Box<dyn BinlogStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            server_id: config.server_id,
            port: config.port,
            uuid: config.uuid_or_generate(),
            auth,
            master,
            lock: Mutex::new(Shared::default()),
            session: Mutex::new(MasterSession {
                state: MasterState::Authenticated,
                assembler: PacketAssembler::new(),
                saved: SavedMaster::default(),
                binlog_name: config.binlog_name.clone(),
                binlog_position: config.binlog_position,
                master_id: config.master_id,
                store,
            }),
            stats: RouterStats::new(),
        })
    }

    /// Server id the router registers with.
    pub fn server_id(&self) -> u32 {
        self.server_id
    }

    /// Router UUID announced to the master.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Session credentials for the connection layer.
    pub fn auth(&self) -> &AuthBlob {
        &self.auth
    }

    /// Statistics counters.
    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }

    /// Current state of the master connection.
    pub fn master_state(&self) -> MasterState {
        self.session.lock().state
    }

    /// Binlog file currently being written.
    pub fn binlog_name(&self) -> String {
        self.session.lock().binlog_name.clone()
    }

    /// Current replication position.
    pub fn binlog_position(&self) -> u64 {
        self.session.lock().binlog_position
    }

    /// Saved fake format description event, if one has been seen.
    pub fn saved_fde(&self) -> Option<Bytes> {
        self.session.lock().saved.fde_event.clone()
    }

    /// Number of attached slaves.
    pub fn slave_count(&self) -> usize {
        self.lock.lock().slaves.len()
    }

    /// Attach a registered replica expecting `binlog_name:binlog_pos`.
    ///
    /// Registration itself (authentication, the slave's dump request) is
    /// handled outside this core.
    pub fn attach_slave(
        &self,
        server_id: u32,
        conn: Arc<dyn Link>,
        binlog_name: impl Into<String>,
        binlog_pos: u64,
    ) {
        let slave = Slave::new(server_id, conn, binlog_name.into(), binlog_pos);
        info!(server_id, binlog_pos, "slave attached");
        self.lock.lock().slaves.push(slave);
    }

    /// Detach a replica and close its connection. Returns false if no
    /// such replica is attached.
    pub fn detach_slave(&self, server_id: u32) -> bool {
        let mut shared = self.lock.lock();
        match shared.slaves.iter().position(|s| s.server_id == server_id) {
            Some(idx) => {
                let slave = shared.slaves.swap_remove(idx);
                slave.close();
                info!(server_id, "slave detached");
                true
            }
            None => false,
        }
    }

    /// Kick off the replication handshake on a freshly authenticated
    /// connection: send the first probe and await its response.
    pub fn start(&self) -> Result<()> {
        let mut session = self.session.lock();
        info!(
            server_id = self.server_id,
            uuid = %self.uuid,
            file = %session.binlog_name,
            position = session.binlog_position,
            "starting replication handshake"
        );
        self.master.write(codec::query_packet("SELECT UNIX_TIMESTAMP()"))?;
        session.state = MasterState::Timestamp;
        Ok(())
    }

    /// Entry point for every delivery from the master connection.
    ///
    /// Deliveries may arrive on any thread; processing happens on exactly
    /// one at a time, in arrival order (see the module doc).
    pub fn master_response(&self, buf: Bytes) {
        let mut buf = buf;
        {
            let mut shared = self.lock.lock();
            if shared.active_logs {
                shared.queue.push_back(buf);
                return;
            }
            shared.active_logs = true;
        }

        loop {
            self.process_response(buf);

            // Pick up anything queued by other threads while we were
            // processing, or release the gate.
            let mut shared = self.lock.lock();
            match shared.queue.pop_front() {
                Some(next) => buf = next,
                None => {
                    shared.active_logs = false;
                    return;
                }
            }
        }
    }

    /// Handle one delivery inside the gate.
    fn process_response(&self, buf: Bytes) {
        let mut session = self.session.lock();

        if session.state == MasterState::BinlogDump {
            self.ingest(&mut session, buf);
            return;
        }

        if event::is_error_packet(&buf) {
            let (code, message) = event::parse_error_packet(&buf).unwrap_or((0, String::new()));
            let err = crate::Error::Master {
                state: session.state.name(),
                code,
                message,
            };
            error!(%err, "handshake halted");
            return;
        }

        self.advance_handshake(&mut session, buf);
    }

    /// One step of the pre-dump state machine: save the response to the
    /// previous probe and send the next one.
    fn advance_handshake(&self, session: &mut MasterSession, buf: Bytes) {
        match session.state {
            MasterState::Authenticated => {
                // No probe has been sent yet, so nothing should arrive.
                warn!("response from master before any probe was sent");
            }
            MasterState::Timestamp => {
                // Response to the timestamp probe is not retained.
                self.send_query(
                    session,
                    "SHOW VARIABLES LIKE 'SERVER_ID'",
                    MasterState::ServerId,
                );
            }
            MasterState::ServerId => {
                // TODO: decode the resultset into master_id instead of
                // relying on the configured value.
                session.saved.server_id = Some(buf);
                self.send_query(
                    session,
                    "SET @master_heartbeat_period = 1799999979520",
                    MasterState::HeartbeatPeriod,
                );
            }
            MasterState::HeartbeatPeriod => {
                session.saved.heartbeat = Some(buf);
                self.send_query(
                    session,
                    "SET @master_binlog_checksum = @@global.binlog_checksum",
                    MasterState::Checksum1,
                );
            }
            MasterState::Checksum1 => {
                session.saved.chksum1 = Some(buf);
                self.send_query(
                    session,
                    "SELECT @master_binlog_checksum",
                    MasterState::Checksum2,
                );
            }
            MasterState::Checksum2 => {
                session.saved.chksum2 = Some(buf);
                self.send_query(session, "SELECT @@GLOBAL.GTID_MODE", MasterState::GtidMode);
            }
            MasterState::GtidMode => {
                session.saved.gtid_mode = Some(buf);
                self.send_query(
                    session,
                    "SHOW VARIABLES LIKE 'SERVER_UUID'",
                    MasterState::MasterUuid,
                );
            }
            MasterState::MasterUuid => {
                session.saved.uuid = Some(buf);
                let query = format!("SET @slave_uuid='{}'", self.uuid);
                self.send_query(session, &query, MasterState::SlaveUuid);
            }
            MasterState::SlaveUuid => {
                session.saved.setslaveuuid = Some(buf);
                self.send_query(session, "SET NAMES latin1", MasterState::Latin1);
            }
            MasterState::Latin1 => {
                session.saved.setnames = Some(buf);
                let pkt =
                    codec::register_slave_packet(self.server_id, self.port, session.master_id);
                self.send(pkt);
                session.state = MasterState::Register;
            }
            MasterState::Register => {
                info!(
                    file = %session.binlog_name,
                    position = session.binlog_position,
                    "registered with master, requesting binlog dump"
                );
                let pkt = codec::binlog_dump_packet(
                    session.binlog_position,
                    self.server_id,
                    &session.binlog_name,
                );
                self.send(pkt);
                session.state = MasterState::BinlogDump;
            }
            // Routed to ingest before we get here.
            MasterState::BinlogDump => {}
        }
    }

    fn send_query(&self, session: &mut MasterSession, sql: &str, next: MasterState) {
        trace!(state = next.name(), query = sql, "sending probe");
        self.send(codec::query_packet(sql));
        session.state = next;
    }

    /// Write to the master, treating failure as a non-fatal drop; the
    /// supervisor owns reconnection.
    fn send(&self, pkt: Bytes) {
        if let Err(e) = self.master.write(pkt) {
            warn!(error = %e, "write to master failed");
        }
    }

    /// Ingest one delivery of binlog stream bytes: reassemble whole
    /// packets, process each event, then flush the local binlog.
    fn ingest(&self, session: &mut MasterSession, buf: Bytes) {
        session.assembler.push(buf);
        while let Some(pkt) = session.assembler.next_packet() {
            self.handle_event(session, &pkt);
        }
        if let Err(e) = session.store.flush() {
            warn!(error = %e, "binlog flush failed");
        }
    }

    /// Classify and act on one whole replication packet.
    fn handle_event(&self, session: &mut MasterSession, pkt: &[u8]) {
        let hdr = match ReplicationHeader::parse(pkt) {
            Ok(hdr) => hdr,
            Err(e) => {
                self.stats.n_binlog_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "undecodable packet in binlog stream");
                return;
            }
        };

        if hdr.ok != 0 {
            let (code, message) = event::parse_error_packet(pkt).unwrap_or((0, String::new()));
            error!(code, %message, "error packet in binlog stream");
            self.stats.n_binlog_errors.fetch_add(1, Ordering::Relaxed);
            return;
        }

        self.stats.n_binlogs.fetch_add(1, Ordering::Relaxed);
        self.stats.record_event_type(hdr.event_type);
        trace!(
            event_type = hdr.event_type,
            event_size = hdr.event_size,
            next_pos = hdr.next_pos,
            flags = hdr.flags,
            "binlog event"
        );

        let event = match hdr.event_bytes(pkt) {
            Ok(event) => event,
            Err(e) => {
                self.stats.n_binlog_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "event overruns its packet");
                return;
            }
        };

        if hdr.event_type == FORMAT_DESCRIPTION_EVENT && hdr.next_pos == 0 {
            // Fake FDE announcing the stream format; keep a copy to
            // replay to slaves that attach later.
            self.stats.n_fakeevents.fetch_add(1, Ordering::Relaxed);
            session.saved.fde_event = Some(Bytes::copy_from_slice(event));
            return;
        }

        if hdr.event_type == HEARTBEAT_EVENT {
            trace!("replication heartbeat");
            return;
        }

        if hdr.is_artificial() {
            // Informational only: never journalled, never fanned out,
            // but a rotate still moves our file tracking.
            if hdr.event_type == ROTATE_EVENT {
                self.rotate(session, event);
            }
            return;
        }

        if let Err(e) = session.store.append(event) {
            self.stats.n_binlog_errors.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "binlog append failed");
        }
        if hdr.next_pos != 0 {
            session.binlog_position = u64::from(hdr.next_pos);
        }
        if hdr.event_type == ROTATE_EVENT {
            self.rotate(session, event);
        }
        self.distribute(&hdr, event);
    }

    /// Follow a rotate event to the next binlog file.
    fn rotate(&self, session: &mut MasterSession, event: &[u8]) {
        let rotate = match Rotate::parse(event) {
            Ok(rotate) => rotate,
            Err(e) => {
                self.stats.n_binlog_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "undecodable rotate event");
                return;
            }
        };
        if rotate.name != session.binlog_name {
            self.stats.n_rotates.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = session.store.rotate(&rotate.name, rotate.position) {
                warn!(file = %rotate.name, error = %e, "binlog rotate failed");
            }
            session.binlog_name = rotate.name;
            session.binlog_position = rotate.position;
        }
    }

    /// Fan the event out to every slave sitting exactly at the offset this
    /// event was read from. Slaves elsewhere are skipped; catching them up
    /// is the file-reader path's job, not ours.
    fn distribute(&self, hdr: &ReplicationHeader, event: &[u8]) {
        let expected = match hdr.start_pos() {
            Some(pos) => pos,
            None => return,
        };

        let mut shared = self.lock.lock();
        for slave in shared.slaves.iter_mut() {
            if slave.binlog_pos != expected {
                continue;
            }
            if let Err(e) = slave.send_event(event) {
                warn!(server_id = slave.server_id, error = %e, "write to slave failed");
            }
            slave.binlog_pos = u64::from(hdr.next_pos);
            if hdr.event_type == ROTATE_EVENT {
                slave.rotate(event);
            }
        }
    }
}

impl std::fmt::Debug for RouterInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterInstance")
            .field("server_id", &self.server_id)
            .field("uuid", &self.uuid)
            .field("state", &self.master_state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
impl RouterInstance {
    /// Instance wired to a discarding link and store, for tests that only
    /// exercise bookkeeping.
    pub(crate) fn for_tests(config: RouterConfig, auth: AuthBlob) -> Arc<Self> {
        struct NullLink;
        impl Link for NullLink {
            fn write(&self, _buf: Bytes) -> Result<()> {
                Ok(())
            }
            fn close(&self) {}
        }

        struct NullStore;
        impl BinlogStore for NullStore {
            fn append(&mut self, _event: &[u8]) -> std::result::Result<(), crate::error::StorageError> {
                Ok(())
            }
            fn rotate(
                &mut self,
                _name: &str,
                _position: u64,
            ) -> std::result::Result<(), crate::error::StorageError> {
                Ok(())
            }
            fn flush(&mut self) -> std::result::Result<(), crate::error::StorageError> {
                Ok(())
            }
        }

        Self::new(&config, auth, Arc::new(NullLink), Box::new(NullStore))
    }
}
