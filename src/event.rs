// ============================================================================
// src/event.rs – Permission decision events and caller identity
// ============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;

/// One permission decision reported by a platform component.
///
/// Every string is recorded verbatim; nothing here is validated for length,
/// character set or vocabulary (`outcome` is free text, not an enum).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionEvent {
    /// Caller-supplied epoch milliseconds. May be negative or far in the future.
    pub timestamp_millis: i64,
    pub source_component: String,
    pub package_name: String,
    pub permission: String,
    pub outcome: String,
    #[serde(default)]
    pub details: Option<String>,
}

impl PermissionEvent {
    pub fn new(
        timestamp_millis: i64,
        source_component: impl Into<String>,
        package_name: impl Into<String>,
        permission: impl Into<String>,
        outcome: impl Into<String>,
        details: Option<impl Into<String>>,
    ) -> Self {
        Self {
            timestamp_millis,
            source_component: source_component.into(),
            package_name: package_name.into(),
            permission: permission.into(),
            outcome: outcome.into(),
            details: details.map(Into::into),
        }
    }

    /// Details with absent normalized to the empty string.
    pub fn details_or_empty(&self) -> &str {
        self.details.as_deref().unwrap_or("")
    }
}

/// Who handed an event to the front door. Diagnostic only; never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallerIdentity {
    pub uid: Option<u32>,
    pub pid: Option<i32>,
}

impl CallerIdentity {
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn from_uid(uid: u32) -> Self {
        Self {
            uid: Some(uid),
            pid: None,
        }
    }

    /// Identity of the current process, used for in-process callers.
    pub fn current_process() -> Self {
        Self {
            uid: Some(nix::unistd::getuid().as_raw()),
            pid: Some(nix::unistd::getpid().as_raw()),
        }
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.uid, self.pid) {
            (Some(uid), Some(pid)) => write!(f, "uid={uid} pid={pid}"),
            (Some(uid), None) => write!(f, "uid={uid}"),
            (None, Some(pid)) => write!(f, "pid={pid}"),
            (None, None) => f.write_str("unknown"),
        }
    }
}
