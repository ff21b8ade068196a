//! Router configuration.

use crate::error::ConfigError;
use crate::DEFAULT_MASTER_PORT;
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration for one replication router instance.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    // === Master endpoint ===
    /// Master host
    pub master_host: String,
    /// Master port
    pub master_port: u16,
    /// Replication user
    pub user: String,
    /// Replication password
    pub password: String,
    /// Default database for the session
    pub database: String,

    // === Identity ===
    /// Server id the router registers with
    pub server_id: u32,
    /// Server id of the master
    pub master_id: u32,
    /// Router UUID announced via `@slave_uuid` (generated when absent)
    pub uuid: Option<String>,
    /// Port the router listens on for replicas
    pub port: u16,

    // === Binlog ===
    /// Directory the local binlog files live in
    pub binlog_dir: PathBuf,
    /// Binlog file to resume from
    pub binlog_name: String,
    /// Offset to resume from
    pub binlog_position: u64,

    // === Logging ===
    /// Log verbosity
    pub loglevel: LogLevel,
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Everything, including per-event traces
    Debug,
    /// Normal operation
    #[default]
    Notice,
    /// Problems only
    Warning,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            master_host: "127.0.0.1".to_string(),
            master_port: DEFAULT_MASTER_PORT,
            user: "repl".to_string(),
            password: String::new(),
            database: String::new(),
            server_id: 1,
            master_id: 0,
            uuid: None,
            port: 3307,
            binlog_dir: PathBuf::from("."),
            binlog_name: "mysql-bin.000001".to_string(),
            binlog_position: 4,
            loglevel: LogLevel::default(),
        }
    }
}

impl RouterConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the master endpoint.
    pub fn master(mut self, host: impl Into<String>, port: u16) -> Self {
        self.master_host = host.into();
        self.master_port = port;
        self
    }

    /// Set the replication credentials.
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Set the router's server id.
    pub fn server_id(mut self, id: u32) -> Self {
        self.server_id = id;
        self
    }

    /// Set the binlog directory.
    pub fn binlog_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.binlog_dir = dir.into();
        self
    }

    /// Set the binlog file and offset to resume from.
    pub fn resume_from(mut self, name: impl Into<String>, position: u64) -> Self {
        self.binlog_name = name.into();
        self.binlog_position = position;
        self
    }

    /// The router UUID, generating one if none was configured.
    pub fn uuid_or_generate(&self) -> String {
        self.uuid
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    /// Load configuration from a directive file.
    ///
    /// # Format
    /// ```text
    /// # Comment
    /// directive value
    /// directive "value with spaces"
    /// ```
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config = RouterConfig::default();

        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (directive, value) = parse_line(line).ok_or_else(|| ConfigError::Parse {
                line: line_num + 1,
                message: "invalid directive format".to_string(),
            })?;

            config.apply_directive(&directive.to_lowercase(), value, line_num + 1)?;
        }

        Ok(config)
    }

    fn apply_directive(
        &mut self,
        directive: &str,
        value: &str,
        line: usize,
    ) -> Result<(), ConfigError> {
        match directive {
            "master-host" => self.master_host = value.to_string(),
            "master-port" => self.master_port = parse_number(value, line)?,
            "user" => self.user = value.to_string(),
            "password" => self.password = value.to_string(),
            "database" => self.database = value.to_string(),
            "server-id" => self.server_id = parse_number(value, line)?,
            "master-id" => self.master_id = parse_number(value, line)?,
            "uuid" => self.uuid = Some(value.to_string()),
            "port" => self.port = parse_number(value, line)?,
            "binlog-dir" => self.binlog_dir = PathBuf::from(value),
            "binlog-name" => self.binlog_name = value.to_string(),
            "binlog-position" => self.binlog_position = parse_number(value, line)?,
            "loglevel" => {
                self.loglevel = match value.to_lowercase().as_str() {
                    "debug" => LogLevel::Debug,
                    "notice" => LogLevel::Notice,
                    "warning" => LogLevel::Warning,
                    _ => {
                        return Err(ConfigError::Parse {
                            line,
                            message: format!("invalid loglevel: {value}"),
                        })
                    }
                };
            }
            // Unknown directive: ignore for forward compatibility.
            _ => {
                tracing::warn!("unknown config directive at line {}: {}", line, directive);
            }
        }

        Ok(())
    }
}

/// Split a config line into directive and (possibly quoted) value.
fn parse_line(line: &str) -> Option<(&str, &str)> {
    let mut parts = line.splitn(2, |c: char| c.is_whitespace());
    let directive = parts.next()?.trim();
    let value = parts.next().map(str::trim).unwrap_or("");

    let value = if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
        &value[1..value.len() - 1]
    } else {
        value
    };

    Some((directive, value))
}

fn parse_number<T: std::str::FromStr>(value: &str, line: usize) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Parse {
        line,
        message: format!("invalid number: {value}"),
    })
}
