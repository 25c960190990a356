// ============================================================================
// src/cmd/doctor.rs – Inspect the sink's environment (directory, file, socket)
// ============================================================================

use crate::config::Config;
use crate::ui::UX;
use anyhow::{anyhow, Result};
use nix::unistd::{access, AccessFlags};
use std::fs;
use std::io;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Pass,
    Warn,
    Fail,
}

impl Status {
    fn label(self) -> &'static str {
        match self {
            Status::Pass => "[PASS]",
            Status::Warn => "[WARN]",
            Status::Fail => "[FAIL]",
        }
    }
}

#[derive(Debug)]
pub struct ReportEntry {
    pub name: &'static str,
    pub status: Status,
    pub detail: String,
}

pub fn run_doctor(ui: &UX, cfg: &Config) -> Result<()> {
    ui.phase("Permission Log Sink // Environment Report");

    let report = diagnose(cfg);
    for entry in &report {
        let line = format!("{} {}: {}", entry.status.label(), entry.name, entry.detail);
        match entry.status {
            Status::Pass => ui.success(&line),
            Status::Warn => ui.warn(&line),
            Status::Fail => ui.error(&line),
        }
    }
    summarize(&report, ui)
}

/// Collect every check without printing.
pub fn diagnose(cfg: &Config) -> Vec<ReportEntry> {
    let mut report = Vec::new();
    let dir = &cfg.storage.log_dir;

    // ---------------------------------------------------------------------
    // Log directory (provisioned externally, never created here)
    // ---------------------------------------------------------------------
    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => {
            let mode = meta.permissions().mode() & 0o7777;
            report.push(entry(
                "Log directory",
                Status::Pass,
                format!("{} (mode {:o})", dir.display(), mode),
            ));
            match access(dir.as_path(), AccessFlags::W_OK | AccessFlags::X_OK) {
                Ok(()) => report.push(entry(
                    "Writable",
                    Status::Pass,
                    "current user may append records".to_string(),
                )),
                Err(err) => report.push(entry(
                    "Writable",
                    Status::Fail,
                    format!("{} not writable by this user: {}", dir.display(), err),
                )),
            }
        }
        Ok(_) => report.push(entry(
            "Log directory",
            Status::Fail,
            format!("{} exists but is not a directory", dir.display()),
        )),
        Err(err) => report.push(entry(
            "Log directory",
            Status::Fail,
            format!("{} unavailable ({}); provisioning must create it", dir.display(), err),
        )),
    }

    // ---------------------------------------------------------------------
    // Log file
    // ---------------------------------------------------------------------
    let log_path = cfg.storage.log_path();
    match fs::metadata(&log_path) {
        Ok(meta) if meta.is_file() => report.push(entry(
            "Log file",
            Status::Pass,
            format!("{} ({} bytes)", log_path.display(), meta.len()),
        )),
        Ok(_) => report.push(entry(
            "Log file",
            Status::Fail,
            format!("{} is not a regular file", log_path.display()),
        )),
        Err(err) if err.kind() == io::ErrorKind::NotFound => report.push(entry(
            "Log file",
            Status::Warn,
            format!("{} not created yet (first event creates it)", log_path.display()),
        )),
        Err(err) => report.push(entry(
            "Log file",
            Status::Warn,
            format!("{}: {}", log_path.display(), err),
        )),
    }

    // ---------------------------------------------------------------------
    // Ingestion endpoint
    // ---------------------------------------------------------------------
    let socket = &cfg.service.socket_path;
    match fs::symlink_metadata(socket) {
        Ok(meta) if meta.file_type().is_socket() => report.push(entry(
            "Endpoint",
            Status::Pass,
            format!("'{}' at {}", cfg.service.name, socket.display()),
        )),
        Ok(_) => report.push(entry(
            "Endpoint",
            Status::Fail,
            format!("{} exists but is not a socket; registration will fail", socket.display()),
        )),
        Err(_) => report.push(entry(
            "Endpoint",
            Status::Warn,
            format!("no socket at {} (daemon not running?)", socket.display()),
        )),
    }

    report
}

fn entry(name: &'static str, status: Status, detail: String) -> ReportEntry {
    ReportEntry {
        name,
        status,
        detail,
    }
}

fn summarize(report: &[ReportEntry], ui: &UX) -> Result<()> {
    let count = |s: Status| report.iter().filter(|e| e.status == s).count();
    let (passes, warns, fails) = (count(Status::Pass), count(Status::Warn), count(Status::Fail));

    ui.info(&format!("Pass {passes} / Warn {warns} / Fail {fails}"));
    if fails > 0 {
        return Err(anyhow!("{fails} check(s) failed"));
    }
    Ok(())
}
