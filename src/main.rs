//! Binrelay: a MySQL binlog replication router.
//!
//! This is the main entry point for the binrelay daemon. It owns the
//! process-level plumbing only: argument parsing, logging, the TCP
//! connection to the master and the pump that feeds received bytes into
//! the router core. The MySQL login exchange itself belongs to the
//! connection layer in front of this binary; the router begins at the
//! post-authentication handshake and carries the credentials blob
//! opaquely.

use binrelay::router::LogLevel;
use binrelay::{AuthBlob, BinlogFile, Link, RouterConfig, RouterInstance, VERSION};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cli = parse_args(&args)?;

    if cli.help {
        print_help();
        return Ok(());
    }
    if cli.version {
        println!("binrelay version {VERSION}");
        return Ok(());
    }

    // Load configuration
    let mut config = if let Some(ref config_path) = cli.config {
        match RouterConfig::load_from_file(config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Error loading config file: {e}");
                std::process::exit(1);
            }
        }
    } else {
        RouterConfig::default()
    };

    // Override with CLI arguments
    if let Some(server_id) = cli.server_id {
        config.server_id = server_id;
    }
    if let Some(binlog_dir) = cli.binlog_dir {
        config.binlog_dir = binlog_dir;
    }

    // Initialize logging
    let log_level = match config.loglevel {
        LogLevel::Debug => "debug",
        LogLevel::Notice => "info",
        LogLevel::Warning => "warn",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    info!(
        "binrelay {} replicating from {}:{}",
        VERSION, config.master_host, config.master_port
    );

    // Connect to the master and split the socket: reads feed the router,
    // writes drain a channel so the core never blocks on the socket.
    let stream = TcpStream::connect((config.master_host.clone(), config.master_port)).await?;
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    tokio::spawn(async move {
        while let Some(pkt) = rx.recv().await {
            if let Err(e) = writer.write_all(&pkt).await {
                error!("write to master failed: {e}");
                break;
            }
        }
    });

    let auth = AuthBlob::new(&config.user, &config.password, &config.database);
    let store = BinlogFile::open(&config.binlog_dir, &config.binlog_name)?;
    let master: Arc<dyn Link> = Arc::new(ChannelLink::new(tx));
    let router = RouterInstance::new(&config, auth, master, Box::new(store));
    binrelay::router::registry::global().register(router.clone());

    router.start()?;

    // Shutdown on Ctrl+C.
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut buf = BytesMut::with_capacity(64 * 1024);
    loop {
        tokio::select! {
            read = reader.read_buf(&mut buf) => {
                match read {
                    Ok(0) => {
                        warn!("master closed the connection");
                        break;
                    }
                    Ok(_) => {
                        router.master_response(buf.split().freeze());
                    }
                    Err(e) => {
                        error!("read from master failed: {e}");
                        break;
                    }
                }
            }
            _ = &mut shutdown => {
                info!("received shutdown signal");
                break;
            }
        }
    }

    let stats = router.stats().snapshot();
    info!(
        events = stats.n_binlogs,
        rotates = stats.n_rotates,
        errors = stats.n_binlog_errors,
        "binrelay stopping"
    );
    Ok(())
}

/// Master connection handle: writes go through a channel drained by the
/// writer task, so a slow socket never stalls the response pipeline.
struct ChannelLink {
    tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
}

impl ChannelLink {
    fn new(tx: mpsc::UnboundedSender<Bytes>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }
}

impl Link for ChannelLink {
    fn write(&self, buf: Bytes) -> binrelay::Result<()> {
        match &*self.tx.lock() {
            Some(tx) => tx
                .send(buf)
                .map_err(|_| binrelay::Error::Connection("master writer gone".to_string())),
            None => Err(binrelay::Error::Connection("link closed".to_string())),
        }
    }

    fn close(&self) {
        self.tx.lock().take();
    }
}

/// Parsed command line arguments.
#[derive(Default)]
struct Cli {
    help: bool,
    version: bool,
    config: Option<PathBuf>,
    server_id: Option<u32>,
    binlog_dir: Option<PathBuf>,
}

fn parse_args(args: &[String]) -> anyhow::Result<Cli> {
    let mut cli = Cli::default();
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => cli.help = true,
            "-v" | "--version" => cli.version = true,
            "-c" | "--config" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config requires a path"))?;
                cli.config = Some(PathBuf::from(value));
            }
            "--server-id" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--server-id requires a value"))?;
                cli.server_id = Some(value.parse()?);
            }
            "--binlog-dir" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--binlog-dir requires a path"))?;
                cli.binlog_dir = Some(PathBuf::from(value));
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(cli)
}

fn print_help() {
    println!(
        "binrelay {VERSION} - MySQL binlog replication router

USAGE:
    binrelay [OPTIONS]

OPTIONS:
    -c, --config <PATH>      Configuration file
        --server-id <ID>     Override the configured server id
        --binlog-dir <PATH>  Override the binlog directory
    -h, --help               Print help
    -v, --version            Print version"
    );
}
