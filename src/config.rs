// ============================================================================
// src/config.rs – strict config loader
// ============================================================================

use crate::record::{QuoteStyle, RecordEncoder, RecordTimezone};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/permission-log-sink.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Storage {
    /// Pre-provisioned log directory. Never created by the sink.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_file_name")]
    pub file_name: String,
    /// Mode applied when the log file is first created.
    #[serde(default = "default_file_mode")]
    pub file_mode: u32,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/data/misc/permission_log")
}

fn default_file_name() -> String {
    "permission_events.log".to_string()
}

fn default_file_mode() -> u32 {
    0o600
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            file_name: default_file_name(),
            file_mode: default_file_mode(),
        }
    }
}

impl Storage {
    pub fn log_path(&self) -> PathBuf {
        self.log_dir.join(&self.file_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Queue {
    /// Maximum queued events; 0 means unbounded.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    4096
}

impl Default for Queue {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Record {
    #[serde(default)]
    pub quote_style: QuoteStyle,
    #[serde(default)]
    pub timezone: RecordTimezone,
}

impl Record {
    pub fn encoder(&self) -> RecordEncoder {
        RecordEncoder::new(self.quote_style, self.timezone)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Durability {
    /// `sync_data` after every append.
    #[serde(default = "default_true")]
    pub fsync: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Durability {
    fn default() -> Self {
        Self { fsync: true }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Write whatever is already queued, then stop.
    #[default]
    Drain,
    /// Drop queued events and stop.
    Discard,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Shutdown {
    #[serde(default)]
    pub policy: ShutdownPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    #[serde(default = "default_socket_mode")]
    pub socket_mode: u32,
}

fn default_service_name() -> String {
    "permission_logger_service".to_string()
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/run/permission-log-sink/ingest.sock")
}

fn default_socket_mode() -> u32 {
    0o660
}

impl Default for Service {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            socket_path: default_socket_path(),
            socket_mode: default_socket_mode(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    /// Default tracing filter; `RUST_LOG` wins when set.
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: Storage,
    #[serde(default)]
    pub queue: Queue,
    #[serde(default)]
    pub record: Record,
    #[serde(default)]
    pub durability: Durability,
    #[serde(default)]
    pub shutdown: Shutdown,
    #[serde(default)]
    pub service: Service,
    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    pub fn load<P: AsRef<Path>>(p: P) -> Result<Self> {
        let s = fs::read_to_string(&p)
            .with_context(|| format!("read config: {}", p.as_ref().display()))?;
        let cfg: Self = if p.as_ref().extension().and_then(|e| e.to_str()) == Some("toml") {
            toml::from_str(&s).context("toml parse")?
        } else {
            serde_yaml::from_str(&s).context("yaml parse")?
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load an explicit path, or the default path when present, or defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::load(DEFAULT_CONFIG_PATH),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let name = &self.storage.file_name;
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            bail!("storage.file_name must be a plain file name, got {name:?}");
        }
        if self.storage.file_mode > 0o7777 || self.service.socket_mode > 0o7777 {
            bail!("file/socket modes must be permission bits (<= 0o7777)");
        }
        if self.service.name.trim().is_empty() {
            bail!("service.name must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_cfg(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = fs::File::create(&path).expect("create config");
        f.write_all(body.as_bytes()).expect("write config");
        path
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let td = tempfile::tempdir().expect("tempdir");
        let path = write_cfg(td.path(), "sink.toml", "");
        let cfg = Config::load(&path).expect("load");
        assert_eq!(
            cfg.storage.log_path(),
            PathBuf::from("/data/misc/permission_log/permission_events.log")
        );
        assert_eq!(cfg.queue.capacity, 4096);
        assert_eq!(cfg.record.quote_style, QuoteStyle::Always);
        assert_eq!(cfg.record.timezone, RecordTimezone::Utc);
        assert!(cfg.durability.fsync);
        assert_eq!(cfg.shutdown.policy, ShutdownPolicy::Drain);
    }

    #[test]
    fn toml_overrides_apply() {
        let td = tempfile::tempdir().expect("tempdir");
        let path = write_cfg(
            td.path(),
            "sink.toml",
            r#"
[storage]
log_dir = "/var/log/perm"
file_name = "events.csv"

[queue]
capacity = 0

[record]
quote_style = "necessary"
timezone = "local"

[shutdown]
policy = "discard"
"#,
        );
        let cfg = Config::load(&path).expect("load");
        assert_eq!(cfg.storage.log_path(), PathBuf::from("/var/log/perm/events.csv"));
        assert_eq!(cfg.queue.capacity, 0);
        assert_eq!(cfg.record.quote_style, QuoteStyle::Necessary);
        assert_eq!(cfg.record.timezone, RecordTimezone::Local);
        assert_eq!(cfg.shutdown.policy, ShutdownPolicy::Discard);
    }

    #[test]
    fn yaml_is_accepted_for_other_extensions() {
        let td = tempfile::tempdir().expect("tempdir");
        let path = write_cfg(
            td.path(),
            "sink.yaml",
            "durability:\n  fsync: false\nservice:\n  socket_path: /tmp/x.sock\n",
        );
        let cfg = Config::load(&path).expect("load");
        assert!(!cfg.durability.fsync);
        assert_eq!(cfg.service.socket_path, PathBuf::from("/tmp/x.sock"));
        assert_eq!(cfg.service.name, "permission_logger_service");
    }

    #[test]
    fn file_name_with_separator_is_refused() {
        let td = tempfile::tempdir().expect("tempdir");
        let path = write_cfg(
            td.path(),
            "sink.toml",
            "[storage]\nfile_name = \"../escape.log\"\n",
        );
        assert!(Config::load(&path).is_err());
    }
}
