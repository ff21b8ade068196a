//! Error types for binrelay.
//!
//! Errors are layered the same way the crate is: wire-level decode problems
//! live in [`ProtocolError`], binlog file problems in [`StorageError`], and
//! everything is unified under [`Error`] for callers that cross layers.

use std::io;
use thiserror::Error;

/// Result type alias for binrelay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for binrelay.
#[derive(Error, Debug)]
pub enum Error {
    /// Wire-level decode errors
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Binlog file errors
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Connection errors
    #[error("connection error: {0}")]
    Connection(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Error packet received from the master
    #[error("master error during {state}: {code} {message}")]
    Master {
        /// State-machine phase the error arrived in
        state: &'static str,
        /// MySQL server error code
        code: u16,
        /// Human-readable message from the error packet
        message: String,
    },
}

/// Wire-level decode errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer too short to hold the expected structure
    #[error("truncated packet: need {needed} bytes, have {have}")]
    Truncated {
        /// Bytes required by the structure being decoded
        needed: usize,
        /// Bytes actually available
        have: usize,
    },

    /// Replication event shorter than its own declared size
    #[error("event size {event_size} exceeds packet payload of {available} bytes")]
    EventOverrun {
        /// Size declared in the event header
        event_size: usize,
        /// Payload bytes actually present
        available: usize,
    },

    /// Rotate event payload too short for position + file name
    #[error("malformed rotate event: {0} byte payload")]
    MalformedRotate(usize),

    /// Packet is not the error packet the caller tried to decode
    #[error("not an error packet")]
    NotAnError,
}

/// Binlog file errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Binlog file name failed validation
    #[error("invalid binlog file name: {0:?}")]
    InvalidName(String),
}

/// Configuration parsing errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// I/O error reading the config file
    #[error("config I/O error: {0}")]
    Io(String),

    /// Parse error in the config file
    #[error("config error at line {line}: {message}")]
    Parse {
        /// 1-based line number
        line: usize,
        /// What went wrong
        message: String,
    },
}

impl Error {
    /// Returns true if this error came from the upstream master rather
    /// than from local processing.
    #[inline]
    pub fn is_upstream(&self) -> bool {
        matches!(self, Error::Master { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Master {
            state: "chksum1",
            code: 1193,
            message: "Unknown system variable".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "master error during chksum1: 1193 Unknown system variable"
        );
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::Truncated { needed: 24, have: 7 };
        assert_eq!(err.to_string(), "truncated packet: need 24 bytes, have 7");
    }

    #[test]
    fn test_upstream_classification() {
        let upstream = Error::Master {
            state: "register",
            code: 1045,
            message: "Access denied".to_string(),
        };
        assert!(upstream.is_upstream());

        let local: Error = ProtocolError::NotAnError.into();
        assert!(!local.is_upstream());
    }
}
