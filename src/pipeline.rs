// ============================================================================
// src/pipeline.rs – Front door + single serializing writer thread
// ============================================================================
//! Many callers hand events to a [`FrontDoor`]; one named writer thread drains
//! them in acceptance order and appends one record per event through a
//! [`RecordSink`]. The handoff never touches the disk.

use crate::config::{Config, ShutdownPolicy};
use crate::error::{RejectReason, Result, SinkError};
use crate::event::{CallerIdentity, PermissionEvent};
use crate::record::RecordEncoder;
use crate::sink::RecordSink;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

const WRITER_THREAD_NAME: &str = "perm-log-writer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Running,
    Stopped,
}

/// Acknowledgment for an accepted event. `seq` is the durable order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub accepted: u64,
    pub rejected: u64,
    pub written: u64,
    pub dropped_dir_missing: u64,
    pub dropped_write_failure: u64,
    pub discarded: u64,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    rejected: AtomicU64,
    written: AtomicU64,
    dropped_dir_missing: AtomicU64,
    dropped_write_failure: AtomicU64,
    discarded: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> WriterStats {
        WriterStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            dropped_dir_missing: self.dropped_dir_missing.load(Ordering::Relaxed),
            dropped_write_failure: self.dropped_write_failure.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

struct Queued {
    seq: u64,
    event: PermissionEvent,
}

enum Handoff {
    Bounded(SyncSender<Queued>),
    Unbounded(Sender<Queued>),
}

impl Handoff {
    fn try_send(&self, item: Queued) -> std::result::Result<(), RejectReason> {
        match self {
            Handoff::Bounded(tx) => tx.try_send(item).map_err(|e| match e {
                TrySendError::Full(_) => RejectReason::QueueFull,
                TrySendError::Disconnected(_) => RejectReason::Stopped,
            }),
            Handoff::Unbounded(tx) => tx.send(item).map_err(|_| RejectReason::Stopped),
        }
    }
}

struct Door {
    handoff: Option<Handoff>,
    next_seq: u64,
}

struct Shared {
    door: Mutex<Door>,
    discard: AtomicBool,
    state: AtomicU8,
    counters: Counters,
}

const STATE_RUNNING: u8 = 0;
const STATE_STOPPED: u8 = 1;

impl Shared {
    fn state(&self) -> WriterState {
        match self.state.load(Ordering::Acquire) {
            STATE_RUNNING => WriterState::Running,
            _ => WriterState::Stopped,
        }
    }
}

// ----------------------------------------------------------------------------
// Front door
// ----------------------------------------------------------------------------

/// Cloneable ingestion handle. Never blocks on I/O.
#[derive(Clone)]
pub struct FrontDoor {
    shared: Arc<Shared>,
}

impl FrontDoor {
    /// Hand one event to the writer.
    ///
    /// Sequence assignment and enqueue happen under one short lock, so the
    /// returned `seq` order is exactly the order the writer drains.
    pub fn submit(&self, event: PermissionEvent, caller: CallerIdentity) -> Result<Accepted> {
        let mut door = self.shared.door.lock();
        let seq = door.next_seq;

        let outcome = match door.handoff.as_ref() {
            Some(handoff) => handoff.try_send(Queued { seq, event }),
            None => Err(RejectReason::Stopped),
        };

        match outcome {
            Ok(()) => {
                door.next_seq += 1;
                drop(door);
                self.shared.counters.accepted.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(%caller, seq, "permission event accepted");
                Ok(Accepted { seq })
            }
            Err(reason) => {
                drop(door);
                self.shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%caller, %reason, "permission event rejected");
                Err(SinkError::Rejected(reason))
            }
        }
    }

    /// Fire-and-forget ingestion API. Rejections end up in diagnostics only.
    #[allow(clippy::too_many_arguments)]
    pub fn log_permission_event(
        &self,
        caller: CallerIdentity,
        timestamp_millis: i64,
        source_component: &str,
        package_name: &str,
        permission: &str,
        outcome: &str,
        details: Option<&str>,
    ) {
        let event = PermissionEvent::new(
            timestamp_millis,
            source_component,
            package_name,
            permission,
            outcome,
            details,
        );
        let _ = self.submit(event, caller);
    }

    pub fn state(&self) -> WriterState {
        self.shared.state()
    }
}

// ----------------------------------------------------------------------------
// Serializing writer
// ----------------------------------------------------------------------------

struct SerializingWriter<S: RecordSink> {
    sink: S,
    encoder: RecordEncoder,
    shared: Arc<Shared>,
}

impl<S: RecordSink> SerializingWriter<S> {
    fn run(mut self, rx: Receiver<Queued>) {
        tracing::debug!(target_file = %self.sink.describe(), "serializing writer running");
        // Ends once the front door has dropped its sender and the queue is empty.
        for queued in rx.iter() {
            if self.shared.discard.load(Ordering::Acquire) {
                self.shared.counters.discarded.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            self.process(queued);
        }
        tracing::info!("serializing writer stopped");
    }

    fn process(&mut self, queued: Queued) {
        let line = self.encoder.encode(&queued.event);
        let counters = &self.shared.counters;
        match self.sink.append(line.as_bytes()) {
            Ok(()) => {
                counters.written.fetch_add(1, Ordering::Relaxed);
            }
            Err(err @ SinkError::DirectoryMissing(_)) => {
                counters.dropped_dir_missing.fetch_add(1, Ordering::Relaxed);
                tracing::error!(seq = queued.seq, error = %err, "log directory gone; event skipped");
            }
            Err(err) => {
                counters.dropped_write_failure.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    seq = queued.seq,
                    access_denied = err.is_access_denied(),
                    error = %err,
                    "append failed; event dropped"
                );
            }
        }
    }
}

/// Marks the writer stopped however its thread exits, unwinding included.
struct StopOnExit(Arc<Shared>);

impl Drop for StopOnExit {
    fn drop(&mut self) {
        self.0.state.store(STATE_STOPPED, Ordering::Release);
    }
}

// ----------------------------------------------------------------------------
// Pipeline handle
// ----------------------------------------------------------------------------

/// Owns the writer thread. Dropping it performs a draining shutdown.
pub struct Pipeline {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Spawn the writer. No environment side effects beyond the thread.
    pub fn start<S: RecordSink>(config: &Config, sink: S) -> std::io::Result<Self> {
        let (handoff, rx) = match config.queue.capacity {
            0 => {
                let (tx, rx) = mpsc::channel();
                (Handoff::Unbounded(tx), rx)
            }
            cap => {
                let (tx, rx) = mpsc::sync_channel(cap);
                (Handoff::Bounded(tx), rx)
            }
        };

        let shared = Arc::new(Shared {
            door: Mutex::new(Door {
                handoff: Some(handoff),
                next_seq: 0,
            }),
            discard: AtomicBool::new(false),
            state: AtomicU8::new(STATE_RUNNING),
            counters: Counters::default(),
        });

        let writer = SerializingWriter {
            sink,
            encoder: config.record.encoder(),
            shared: Arc::clone(&shared),
        };
        let worker = thread::Builder::new()
            .name(WRITER_THREAD_NAME.to_string())
            .spawn(move || {
                // Outlives `run`, so the receiver is closed before the state flips.
                let _stopped = StopOnExit(Arc::clone(&writer.shared));
                writer.run(rx)
            })?;

        tracing::info!(
            capacity = config.queue.capacity,
            quote_style = ?config.record.quote_style,
            timezone = ?config.record.timezone,
            "permission log pipeline started"
        );
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    pub fn front_door(&self) -> FrontDoor {
        FrontDoor {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn state(&self) -> WriterState {
        self.shared.state()
    }

    pub fn stats(&self) -> WriterStats {
        self.shared.counters.snapshot()
    }

    /// Live front doors plus the pipeline's own reference.
    #[cfg(test)]
    pub(crate) fn handle_count(&self) -> usize {
        Arc::strong_count(&self.shared)
    }

    /// Close the front door, then drain or discard the queue and join the writer.
    pub fn shutdown(mut self, policy: ShutdownPolicy) -> WriterStats {
        self.stop(policy);
        self.stats()
    }

    fn stop(&mut self, policy: ShutdownPolicy) {
        if policy == ShutdownPolicy::Discard {
            self.shared.discard.store(true, Ordering::Release);
        }
        // Dropping the only sender lets the writer's receive loop finish.
        let closed = self.shared.door.lock().handoff.take();
        drop(closed);

        if let Some(worker) = self.worker.take() {
            tracing::info!(?policy, "shutting down permission log pipeline");
            if worker.join().is_err() {
                tracing::error!("serializing writer thread panicked");
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop(ShutdownPolicy::Drain);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Durability;
    use crate::error::ErrorKind;
    use crate::record::{decode_record, Records};
    use crate::sink::AppendFileSink;
    use std::fs;
    use std::path::Path;
    use std::sync::mpsc::Receiver as StdReceiver;
    use std::time::{Duration, Instant};

    fn config_for(dir: &Path, capacity: usize) -> Config {
        let mut cfg = Config::default();
        cfg.storage.log_dir = dir.to_path_buf();
        cfg.queue.capacity = capacity;
        cfg.durability = Durability { fsync: false };
        cfg
    }

    fn event(n: u64, details: Option<&str>) -> PermissionEvent {
        PermissionEvent::new(
            1714567890123 + n as i64,
            "pkgmgr",
            "com.example.app",
            "android.permission.CAMERA",
            "denied",
            details,
        )
    }

    /// Sink that waits for a release signal before every append.
    struct GatedSink {
        gate: StdReceiver<()>,
        written: Arc<Mutex<Vec<String>>>,
    }

    impl RecordSink for GatedSink {
        fn append(&mut self, record: &[u8]) -> Result<()> {
            let _ = self.gate.recv();
            self.written
                .lock()
                .push(String::from_utf8_lossy(record).into_owned());
            Ok(())
        }

        fn describe(&self) -> String {
            "gated".into()
        }
    }

    #[test]
    fn scenario_record_lands_on_disk() {
        let td = tempfile::tempdir().expect("tempdir");
        let cfg = config_for(td.path(), 16);
        let pipeline = Pipeline::start(&cfg, AppendFileSink::new(&cfg.storage, &cfg.durability))
            .expect("start");

        pipeline.front_door().log_permission_event(
            CallerIdentity::from_uid(1000),
            1714567890123,
            "pkgmgr",
            "com.example.app",
            "android.permission.CAMERA",
            "denied",
            Some("policy rule 7"),
        );
        let stats = pipeline.shutdown(ShutdownPolicy::Drain);
        assert_eq!(stats.written, 1);

        let body = fs::read_to_string(cfg.storage.log_path()).expect("log file");
        assert_eq!(
            body,
            "\"2024-05-01T12:51:30.123+0000\",1714567890123,\"pkgmgr\",\"com.example.app\",\
             \"android.permission.CAMERA\",\"denied\",\"policy rule 7\"\n"
        );
    }

    #[test]
    fn submit_does_not_wait_for_a_blocked_sink() {
        let (release, gate) = mpsc::channel();
        let written = Arc::new(Mutex::new(Vec::new()));
        let cfg = config_for(Path::new("/unused"), 0);
        let pipeline = Pipeline::start(
            &cfg,
            GatedSink {
                gate,
                written: Arc::clone(&written),
            },
        )
        .expect("start");
        let door = pipeline.front_door();

        let started = Instant::now();
        for n in 0..200 {
            door.submit(event(n, None), CallerIdentity::unknown())
                .expect("accepted while sink is blocked");
        }
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "submit latency must not depend on the sink"
        );
        assert!(written.lock().is_empty(), "nothing may be written before release");

        for _ in 0..200 {
            release.send(()).expect("release");
        }
        let stats = pipeline.shutdown(ShutdownPolicy::Drain);
        assert_eq!(stats.written, 200);
        assert_eq!(written.lock().len(), 200);
    }

    #[test]
    fn bounded_queue_rejects_when_saturated() {
        let (release, gate) = mpsc::channel();
        let cfg = config_for(Path::new("/unused"), 2);
        let pipeline = Pipeline::start(
            &cfg,
            GatedSink {
                gate,
                written: Arc::new(Mutex::new(Vec::new())),
            },
        )
        .expect("start");
        let door = pipeline.front_door();

        // The writer holds at most one event while blocked, the queue two more.
        let mut rejected = 0;
        for n in 0..10 {
            if let Err(err) = door.submit(event(n, None), CallerIdentity::unknown()) {
                assert_eq!(err.kind(), ErrorKind::Rejected);
                rejected += 1;
            }
        }
        assert!(rejected >= 7, "expected saturation, got {rejected} rejections");
        assert_eq!(pipeline.stats().rejected, rejected);

        drop(release);
        pipeline.shutdown(ShutdownPolicy::Drain);
    }

    #[test]
    fn concurrent_callers_land_in_acceptance_order() {
        let td = tempfile::tempdir().expect("tempdir");
        let cfg = config_for(td.path(), 0);
        let pipeline = Pipeline::start(&cfg, AppendFileSink::new(&cfg.storage, &cfg.durability))
            .expect("start");

        const CALLERS: u32 = 8;
        const PER_CALLER: u64 = 100;
        let handles: Vec<_> = (0..CALLERS)
            .map(|caller| {
                let door = pipeline.front_door();
                thread::spawn(move || {
                    let mut seqs = Vec::new();
                    for n in 0..PER_CALLER {
                        // The details carry the caller tag; the acceptance
                        // sequence comes back in the acknowledgment.
                        let tag = format!("caller {caller}, event {n}");
                        let ack = door
                            .submit(event(n, Some(tag.as_str())), CallerIdentity::from_uid(caller))
                            .expect("accepted");
                        seqs.push((ack.seq, tag));
                    }
                    seqs
                })
            })
            .collect();

        let mut expected: Vec<(u64, String)> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("caller thread"))
            .collect();
        expected.sort_by_key(|(seq, _)| *seq);

        let stats = pipeline.shutdown(ShutdownPolicy::Drain);
        assert_eq!(stats.written, u64::from(CALLERS) * PER_CALLER);

        let body = fs::read_to_string(cfg.storage.log_path()).expect("log file");
        let on_disk: Vec<String> = Records::new(&body)
            .map(|r| r.expect("well-formed record").details)
            .collect();
        let want: Vec<String> = expected.into_iter().map(|(_, tag)| tag).collect();
        assert_eq!(on_disk, want);
    }

    #[test]
    fn missing_directory_drops_event_and_writer_survives() {
        let td = tempfile::tempdir().expect("tempdir");
        let log_dir = td.path().join("perm");
        fs::create_dir(&log_dir).expect("provision");
        let cfg = config_for(&log_dir, 16);

        // Removing the directory before the writer sees the first event.
        fs::remove_dir(&log_dir).expect("unprovision");
        let pipeline = Pipeline::start(&cfg, AppendFileSink::new(&cfg.storage, &cfg.durability))
            .expect("start");
        let door = pipeline.front_door();
        door.submit(event(0, Some("lost")), CallerIdentity::unknown())
            .expect("accepted");

        // Wait until the writer has dealt with it.
        let deadline = Instant::now() + Duration::from_secs(5);
        while pipeline.stats().dropped_dir_missing == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(pipeline.stats().dropped_dir_missing, 1);
        assert_eq!(pipeline.state(), WriterState::Running);

        fs::create_dir(&log_dir).expect("reprovision");
        door.submit(event(1, Some("kept")), CallerIdentity::unknown())
            .expect("accepted");
        let stats = pipeline.shutdown(ShutdownPolicy::Drain);
        assert_eq!(stats.written, 1);

        let body = fs::read_to_string(cfg.storage.log_path()).expect("log file");
        let rec = decode_record(&body).expect("one record");
        assert_eq!(rec.details, "kept");
    }

    #[test]
    fn write_failure_drops_event_and_writer_survives() {
        let td = tempfile::tempdir().expect("tempdir");
        let cfg = config_for(td.path(), 16);
        // A directory squatting on the log path makes every open fail.
        fs::create_dir(cfg.storage.log_path()).expect("squat");
        let pipeline = Pipeline::start(&cfg, AppendFileSink::new(&cfg.storage, &cfg.durability))
            .expect("start");
        let door = pipeline.front_door();
        door.submit(event(0, Some("lost")), CallerIdentity::unknown())
            .expect("accepted");

        let deadline = Instant::now() + Duration::from_secs(5);
        while pipeline.stats().dropped_write_failure == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(pipeline.stats().dropped_write_failure, 1);
        assert_eq!(pipeline.stats().dropped_dir_missing, 0);
        assert_eq!(pipeline.state(), WriterState::Running);

        fs::remove_dir(cfg.storage.log_path()).expect("unsquat");
        door.submit(event(1, Some("kept")), CallerIdentity::unknown())
            .expect("accepted");
        let stats = pipeline.shutdown(ShutdownPolicy::Drain);
        assert_eq!(stats.written, 1);
        assert_eq!(stats.dropped_write_failure, 1);

        let body = fs::read_to_string(cfg.storage.log_path()).expect("log file");
        let rec = decode_record(&body).expect("one record");
        assert_eq!(rec.details, "kept");
        assert_eq!(rec.timestamp_millis, 1714567890124);
    }

    struct PanickingSink;

    impl RecordSink for PanickingSink {
        fn append(&mut self, _record: &[u8]) -> Result<()> {
            panic!("sink blew up");
        }

        fn describe(&self) -> String {
            "panicking".into()
        }
    }

    #[test]
    fn writer_panic_leaves_state_stopped() {
        let cfg = config_for(Path::new("/unused"), 0);
        let pipeline = Pipeline::start(&cfg, PanickingSink).expect("start");
        let door = pipeline.front_door();
        door.submit(event(0, None), CallerIdentity::unknown())
            .expect("accepted");

        let deadline = Instant::now() + Duration::from_secs(5);
        while door.state() == WriterState::Running && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(door.state(), WriterState::Stopped);
        assert_eq!(pipeline.state(), WriterState::Stopped);

        let err = door
            .submit(event(1, None), CallerIdentity::unknown())
            .expect_err("writer is gone");
        assert!(matches!(err, SinkError::Rejected(RejectReason::Stopped)));

        let stats = pipeline.shutdown(ShutdownPolicy::Drain);
        assert_eq!(stats.written, 0);
        assert_eq!(stats.rejected, 1);
    }

    #[test]
    fn submissions_after_shutdown_are_rejected() {
        let td = tempfile::tempdir().expect("tempdir");
        let cfg = config_for(td.path(), 16);
        let pipeline = Pipeline::start(&cfg, AppendFileSink::new(&cfg.storage, &cfg.durability))
            .expect("start");
        let door = pipeline.front_door();
        door.submit(event(0, None), CallerIdentity::unknown())
            .expect("accepted");

        let stats = pipeline.shutdown(ShutdownPolicy::Drain);
        assert_eq!(stats.written, 1);
        assert_eq!(door.state(), WriterState::Stopped);

        for n in 1..5 {
            let err = door
                .submit(event(n, None), CallerIdentity::unknown())
                .expect_err("stopped");
            assert!(matches!(err, SinkError::Rejected(RejectReason::Stopped)));
        }
        let body = fs::read_to_string(cfg.storage.log_path()).expect("log file");
        assert_eq!(body.lines().count(), 1);
    }

    #[test]
    fn discard_policy_drops_queued_events() {
        let (release, gate) = mpsc::channel();
        let written = Arc::new(Mutex::new(Vec::new()));
        let cfg = config_for(Path::new("/unused"), 0);
        let pipeline = Pipeline::start(
            &cfg,
            GatedSink {
                gate,
                written: Arc::clone(&written),
            },
        )
        .expect("start");
        let door = pipeline.front_door();
        for n in 0..5 {
            door.submit(event(n, None), CallerIdentity::unknown())
                .expect("accepted");
        }

        // Let the in-flight append finish once shutdown has begun.
        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            for _ in 0..5 {
                let _ = release.send(());
            }
        });
        let stats = pipeline.shutdown(ShutdownPolicy::Discard);
        releaser.join().expect("releaser");

        assert_eq!(stats.written + stats.discarded, 5);
        assert!(stats.discarded >= 4, "queued events must be discarded: {stats:?}");
        assert_eq!(written.lock().len() as u64, stats.written);
    }
}
