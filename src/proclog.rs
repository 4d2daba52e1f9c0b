//! Log sinks for child stdout/stderr.
//!
//! A sink receives raw chunks from the pump task attached to the child's
//! pipe. [`FileLogger`] persists them with size-capped, numbered-backup
//! rotation (`file` → `file.1` → `file.2` ...); [`NullLogger`] discards
//! everything and backs `/dev/null`-style paths; [`ChanLogger`] forwards
//! chunks to a channel for in-process consumers.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use crate::error::Error;

/// Sink contract required by the supervision loop.
pub trait Logger: Send {
    /// Record the pid of the child now feeding this sink.
    fn set_pid(&mut self, _pid: i32) {}

    /// Append one chunk of child output.
    fn write(&mut self, chunk: &[u8]) -> std::io::Result<usize>;

    /// Flush and release any backing resources.
    fn close(&mut self) {}

    /// Read up to `length` bytes starting at `offset`; a negative offset
    /// means "the tail". Returns the text, the offset of its first byte
    /// and whether earlier data has been discarded by rotation.
    fn read_tail_log(&mut self, _offset: i64, _length: i64) -> Result<(String, i64, bool), Error> {
        Err(Error::NoLogFile)
    }
}

/// Build the sink for a configured log path. Empty paths and the
/// platform null devices get a [`NullLogger`]; everything else gets a
/// [`FileLogger`].
pub fn new_logger(name: &str, path: &str, max_bytes: u64, backups: u32) -> Box<dyn Logger> {
    if is_null_path(path) {
        Box::new(NullLogger::new())
    } else {
        Box::new(FileLogger::new(name, path, max_bytes, backups))
    }
}

fn is_null_path(path: &str) -> bool {
    let t = path.trim();
    t.is_empty() || t == "/dev/null" || t.eq_ignore_ascii_case("nul") || t == "none"
}

/// Discards everything; stands in for "no persistence".
#[derive(Debug, Default)]
pub struct NullLogger;

impl NullLogger {
    pub fn new() -> Self {
        Self
    }
}

impl Logger for NullLogger {
    fn write(&mut self, chunk: &[u8]) -> std::io::Result<usize> {
        Ok(chunk.len())
    }
}

/// Forwards each chunk to an unbounded channel. Dropped receivers turn
/// writes into no-ops rather than errors.
pub struct ChanLogger {
    tx: Option<UnboundedSender<Vec<u8>>>,
}

impl ChanLogger {
    pub fn new(tx: UnboundedSender<Vec<u8>>) -> Self {
        Self { tx: Some(tx) }
    }
}

impl Logger for ChanLogger {
    fn write(&mut self, chunk: &[u8]) -> std::io::Result<usize> {
        if let Some(tx) = &self.tx {
            let _ = tx.send(chunk.to_vec());
        }
        Ok(chunk.len())
    }

    fn close(&mut self) {
        self.tx = None;
    }
}

/// Size-capped file sink with numbered backups.
pub struct FileLogger {
    name: String,
    path: PathBuf,
    max_bytes: u64,
    backups: u32,
    file: Option<File>,
    written: u64,
    pid: i32,
}

impl FileLogger {
    pub fn new(name: &str, path: impl Into<PathBuf>, max_bytes: u64, backups: u32) -> Self {
        Self {
            name: name.to_string(),
            path: path.into(),
            max_bytes,
            backups,
            file: None,
            written: 0,
            pid: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&mut self) -> std::io::Result<&mut File> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let f = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.written = f.metadata().map(|m| m.len()).unwrap_or(0);
            self.file = Some(f);
        }
        match &mut self.file {
            Some(f) => Ok(f),
            None => Err(std::io::Error::other("log sink is closed")),
        }
    }

    /// Shift `file` → `file.1` → ... → `file.backups`, dropping the
    /// oldest, then reopen a fresh base file.
    fn rotate(&mut self) -> std::io::Result<()> {
        if let Some(mut f) = self.file.take() {
            let _ = f.flush();
        }

        if self.backups == 0 {
            let _ = std::fs::remove_file(&self.path);
        } else {
            let oldest = backup_path(&self.path, self.backups);
            if oldest.exists() {
                let _ = std::fs::remove_file(&oldest);
            }
            for i in (1..self.backups).rev() {
                let from = backup_path(&self.path, i);
                if from.exists() {
                    let _ = std::fs::rename(&from, backup_path(&self.path, i + 1));
                }
            }
            if self.path.exists() {
                let _ = std::fs::rename(&self.path, backup_path(&self.path, 1));
            }
        }

        self.written = 0;
        self.open()?;
        Ok(())
    }
}

fn backup_path(base: &Path, index: u32) -> PathBuf {
    PathBuf::from(format!("{}.{index}", base.display()))
}

impl Logger for FileLogger {
    fn set_pid(&mut self, pid: i32) {
        self.pid = pid;
    }

    fn write(&mut self, chunk: &[u8]) -> std::io::Result<usize> {
        if self.max_bytes > 0 && self.written.saturating_add(chunk.len() as u64) > self.max_bytes
        {
            if let Err(e) = self.rotate() {
                warn!(sink = %self.name, file = %self.path.display(), err = %e, "log rotation failed");
            }
        }
        let f = self.open()?;
        f.write_all(chunk)?;
        self.written += chunk.len() as u64;
        Ok(chunk.len())
    }

    fn close(&mut self) {
        if let Some(mut f) = self.file.take() {
            let _ = f.flush();
        }
    }

    fn read_tail_log(&mut self, offset: i64, length: i64) -> Result<(String, i64, bool), Error> {
        let mut f = File::open(&self.path).map_err(Error::LogRead)?;
        let size = f
            .metadata()
            .map_err(Error::LogRead)?
            .len() as i64;

        let length = length.max(0);
        let (start, overflow) = if offset < 0 {
            ((size - length).max(0), size > length)
        } else {
            (offset.min(size), false)
        };

        f.seek(SeekFrom::Start(start as u64)).map_err(Error::LogRead)?;
        let mut buf = vec![0u8; (size - start).min(length) as usize];
        f.read_exact(&mut buf).map_err(Error::LogRead)?;
        Ok((String::from_utf8_lossy(&buf).into_owned(), start, overflow))
    }
}
