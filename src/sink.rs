// ============================================================================
// src/sink.rs – Append-only file sink (0600, create+append, flush/fsync)
// ============================================================================

use crate::config::{Durability, Storage};
use crate::error::{Result, SinkError};
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// Destination for encoded records. Owned by the writer thread alone.
pub trait RecordSink: Send + 'static {
    /// Append one complete record. Either the whole record is handed to the
    /// OS or an error is returned.
    fn append(&mut self, record: &[u8]) -> Result<()>;

    /// Where records land, for diagnostics.
    fn describe(&self) -> String;
}

/// Production sink: one fixed file inside a pre-provisioned directory.
///
/// The file is opened per record so an external tool may move it aside
/// between writes. The directory is never created here.
#[derive(Debug)]
pub struct AppendFileSink {
    dir: PathBuf,
    path: PathBuf,
    mode: u32,
    fsync: bool,
}

impl AppendFileSink {
    pub fn new(storage: &Storage, durability: &Durability) -> Self {
        Self {
            dir: storage.log_dir.clone(),
            path: storage.log_path(),
            mode: storage.file_mode,
            fsync: durability.fsync,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSink for AppendFileSink {
    fn append(&mut self, record: &[u8]) -> Result<()> {
        if !self.dir.is_dir() {
            return Err(SinkError::DirectoryMissing(self.dir.clone()));
        }

        let failure = |source| SinkError::WriteFailure {
            path: self.path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .mode(self.mode)
            .open(&self.path)
            .map_err(failure)?;

        // write_all continues short writes until the record is complete.
        file.write_all(record).map_err(failure)?;
        file.flush().map_err(failure)?;
        if self.fsync {
            file.sync_data().map_err(failure)?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Startup check of the log directory. Diagnostic only; never fatal.
pub fn check_log_dir(dir: &Path) -> bool {
    if dir.is_dir() {
        tracing::info!(path = %dir.display(), "log directory present");
        true
    } else {
        tracing::error!(
            path = %dir.display(),
            "log directory is missing or not a directory; provisioning must create it with the right owner and mode"
        );
        false
    }
}
