// ============================================================================
// src/service.rs – Local socket endpoint publishing the ingestion API
// ============================================================================
//! Registration is a separate, fallible step after the pipeline is running.
//! Each client line is one JSON-encoded [`PermissionEvent`]; nothing is sent
//! back. Access control on the socket path belongs to the environment.

use crate::config::Service;
use crate::error::{Result, SinkError};
use crate::event::{CallerIdentity, PermissionEvent};
use crate::pipeline::FrontDoor;
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A published endpoint. Dropping it stops the accept thread and removes the
/// socket file.
#[derive(Debug)]
pub struct Registration {
    name: String,
    socket_path: PathBuf,
    stop: Arc<AtomicBool>,
    accept: Option<JoinHandle<()>>,
}

impl Registration {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(accept) = self.accept.take() {
            // One connection wakes the blocked accept so it can see the flag.
            match UnixStream::connect(&self.socket_path) {
                Ok(_wake) => {
                    if accept.join().is_err() {
                        tracing::error!(service = %self.name, "accept thread panicked");
                    }
                }
                Err(err) => {
                    tracing::warn!(service = %self.name, error = %err, "could not wake accept thread; leaving it detached");
                }
            }
        }
        if let Err(err) = fs::remove_file(&self.socket_path) {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %self.socket_path.display(), error = %err, "could not remove socket");
            }
        }
    }
}

/// Bind the ingestion socket and start accepting callers.
pub fn register(cfg: &Service, door: FrontDoor) -> Result<Registration> {
    let failure = |source| SinkError::RegistrationFailure {
        name: cfg.name.clone(),
        source,
    };

    remove_stale_socket(&cfg.socket_path).map_err(failure)?;
    let listener = UnixListener::bind(&cfg.socket_path).map_err(failure)?;
    fs::set_permissions(&cfg.socket_path, fs::Permissions::from_mode(cfg.socket_mode))
        .map_err(failure)?;

    // The Registration owns the path from here so a spawn failure still cleans up.
    let stop = Arc::new(AtomicBool::new(false));
    let mut registration = Registration {
        name: cfg.name.clone(),
        socket_path: cfg.socket_path.clone(),
        stop: Arc::clone(&stop),
        accept: None,
    };

    let accept = thread::Builder::new()
        .name(format!("{}-accept", cfg.name))
        .spawn(move || accept_loop(listener, door, &stop))
        .map_err(failure)?;
    registration.accept = Some(accept);

    tracing::info!(
        service = %registration.name,
        path = %registration.socket_path.display(),
        "ingestion endpoint registered"
    );
    Ok(registration)
}

/// Only a leftover socket is removed; any other file at the path is left alone.
fn remove_stale_socket(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => fs::remove_file(path),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a socket", path.display()),
        )),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

fn accept_loop(listener: UnixListener, door: FrontDoor, stop: &AtomicBool) {
    for stream in listener.incoming() {
        if stop.load(Ordering::Acquire) {
            break;
        }
        match stream {
            Ok(stream) => {
                let door = door.clone();
                let spawned = thread::Builder::new()
                    .name("perm-log-conn".to_string())
                    .spawn(move || serve_connection(stream, door));
                if let Err(err) = spawned {
                    tracing::error!(error = %err, "could not spawn connection handler");
                }
            }
            Err(err) => tracing::warn!(error = %err, "accept failed"),
        }
    }
    tracing::debug!("accept loop stopped");
}

fn serve_connection(stream: UnixStream, door: FrontDoor) {
    let caller = peer_identity(&stream);
    tracing::debug!(%caller, "ingestion client connected");

    // Lines are read as bytes: invalid UTF-8 is one more malformed line.
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    let mut line_no = 0usize;
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => line_no += 1,
            Err(err) => {
                tracing::warn!(%caller, error = %err, "read from client failed");
                break;
            }
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<PermissionEvent>(&line) {
            Ok(event) => {
                // Rejections are already diagnosed by the front door.
                let _ = door.submit(event, caller);
            }
            Err(err) => {
                tracing::warn!(%caller, line = line_no, error = %err, "malformed event skipped");
            }
        }
    }
    tracing::debug!(%caller, "ingestion client disconnected");
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn peer_identity(stream: &UnixStream) -> CallerIdentity {
    use nix::sys::socket::{getsockopt, sockopt::PeerCredentials};

    match getsockopt(stream, PeerCredentials) {
        Ok(cred) => CallerIdentity {
            uid: Some(cred.uid()),
            pid: Some(cred.pid()),
        },
        Err(err) => {
            tracing::debug!(error = %err, "SO_PEERCRED unavailable");
            CallerIdentity::unknown()
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn peer_identity(_stream: &UnixStream) -> CallerIdentity {
    CallerIdentity::unknown()
}

/// Client side: write events to a registered endpoint, one JSON line each.
pub fn send_events<'a, I>(socket_path: &Path, events: I) -> anyhow::Result<usize>
where
    I: IntoIterator<Item = &'a PermissionEvent>,
{
    use anyhow::Context;

    let mut stream = UnixStream::connect(socket_path)
        .with_context(|| format!("connect to {}", socket_path.display()))?;
    let mut sent = 0;
    for event in events {
        let mut line = serde_json::to_string(event).context("encode event")?;
        line.push('\n');
        stream.write_all(line.as_bytes()).context("send event")?;
        sent += 1;
    }
    stream.flush().context("flush socket")?;
    Ok(sent)
}
