// ============================================================================
// src/error.rs – Closed error taxonomy for the ingestion pipeline
// ============================================================================

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Why the front door refused an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    QueueFull,
    Stopped,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::QueueFull => f.write_str("queue full"),
            RejectReason::Stopped => f.write_str("writer stopped"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("event rejected: {0}")]
    Rejected(RejectReason),

    #[error("log directory missing: {}", .0.display())]
    DirectoryMissing(PathBuf),

    #[error("append to {} failed: {source}", .path.display())]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("registration of service '{name}' failed: {source}")]
    RegistrationFailure {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// Kind-level view of [`SinkError`] so callers can branch without matching payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Rejected,
    DirectoryMissing,
    WriteFailure,
    RegistrationFailure,
}

impl SinkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SinkError::Rejected(_) => ErrorKind::Rejected,
            SinkError::DirectoryMissing(_) => ErrorKind::DirectoryMissing,
            SinkError::WriteFailure { .. } => ErrorKind::WriteFailure,
            SinkError::RegistrationFailure { .. } => ErrorKind::RegistrationFailure,
        }
    }

    /// True when the underlying I/O error was an access-control denial.
    pub fn is_access_denied(&self) -> bool {
        match self {
            SinkError::WriteFailure { source, .. }
            | SinkError::RegistrationFailure { source, .. } => {
                source.kind() == io::ErrorKind::PermissionDenied
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SinkError>;
