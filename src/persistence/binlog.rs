//! Binlog file writer.
//!
//! Events are appended raw, in master order, to a file named after the
//! master's current binlog file. A rotate closes the current file and
//! opens the next one; flush is the durability barrier taken after each
//! drained delivery. Fsync-per-event policies are deliberately not offered
//! here.

use crate::error::StorageError;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Contract between the ingest pipeline and the local binlog.
pub trait BinlogStore: Send {
    /// Persist one raw event payload.
    fn append(&mut self, event: &[u8]) -> Result<(), StorageError>;

    /// Close the active file and start `name` at `position`.
    fn rotate(&mut self, name: &str, position: u64) -> Result<(), StorageError>;

    /// Durability barrier for everything appended so far.
    fn flush(&mut self) -> Result<(), StorageError>;
}

/// File-backed binlog store.
pub struct BinlogFile {
    dir: PathBuf,
    name: String,
    writer: BufWriter<File>,
    bytes_written: u64,
    dirty: bool,
}

impl BinlogFile {
    /// Open (or create) the binlog file `name` under `dir`.
    pub fn open(dir: impl AsRef<Path>, name: &str) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        let writer = Self::open_writer(&dir, name)?;
        Ok(Self {
            dir,
            name: name.to_string(),
            writer,
            bytes_written: 0,
            dirty: false,
        })
    }

    /// Name of the file currently being written.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bytes appended since this file was opened.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn open_writer(dir: &Path, name: &str) -> Result<BufWriter<File>, StorageError> {
        // A binlog name is a bare file name; anything with a path
        // separator would escape the configured directory.
        if name.is_empty() || name.contains('/') || name.contains('\\') {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(name))?;
        Ok(BufWriter::with_capacity(64 * 1024, file))
    }
}

impl BinlogStore for BinlogFile {
    fn append(&mut self, event: &[u8]) -> Result<(), StorageError> {
        self.writer.write_all(event)?;
        self.bytes_written += event.len() as u64;
        self.dirty = true;
        Ok(())
    }

    fn rotate(&mut self, name: &str, position: u64) -> Result<(), StorageError> {
        self.flush()?;
        self.writer = Self::open_writer(&self.dir, name)?;
        info!(from = %self.name, to = %name, position, "binlog rotate");
        self.name = name.to_string();
        self.bytes_written = 0;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        if self.dirty {
            self.writer.flush()?;
            self.writer.get_ref().sync_data()?;
            self.dirty = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_flush() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = BinlogFile::open(dir.path(), "mysql-bin.000001").unwrap();

        store.append(b"first-event").unwrap();
        store.append(b"second-event").unwrap();
        store.flush().unwrap();

        let contents = std::fs::read(dir.path().join("mysql-bin.000001")).unwrap();
        assert_eq!(contents, b"first-eventsecond-event");
        assert_eq!(store.bytes_written(), 23);
    }

    #[test]
    fn test_rotate_switches_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = BinlogFile::open(dir.path(), "mysql-bin.000001").unwrap();

        store.append(b"in-first").unwrap();
        store.rotate("mysql-bin.000002", 4).unwrap();
        store.append(b"in-second").unwrap();
        store.flush().unwrap();

        assert_eq!(store.name(), "mysql-bin.000002");
        assert_eq!(
            std::fs::read(dir.path().join("mysql-bin.000001")).unwrap(),
            b"in-first"
        );
        assert_eq!(
            std::fs::read(dir.path().join("mysql-bin.000002")).unwrap(),
            b"in-second"
        );
    }

    #[test]
    fn test_append_resumes_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mysql-bin.000009"), b"already-here").unwrap();

        let mut store = BinlogFile::open(dir.path(), "mysql-bin.000009").unwrap();
        store.append(b"+more").unwrap();
        store.flush().unwrap();

        assert_eq!(
            std::fs::read(dir.path().join("mysql-bin.000009")).unwrap(),
            b"already-here+more"
        );
    }

    #[test]
    fn test_rejects_path_escapes() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            BinlogFile::open(dir.path(), "../evil"),
            Err(StorageError::InvalidName(_))
        ));
    }
}
