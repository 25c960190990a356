// ============================================================================
// src/lib.rs – Permission Log Sink library root
// ============================================================================
//! Append-only audit trail for permission decisions.
//!
//! Callers hand [`PermissionEvent`]s to a [`FrontDoor`]; a single writer thread
//! encodes them as CSV-style records and appends them to one log file in
//! acceptance order. Every failure is absorbed into diagnostics.

pub mod cmd;
pub mod config;
pub mod error;
pub mod event;
pub mod pipeline;
pub mod record;
pub mod service;
pub mod sink;
pub mod ui;

pub use config::Config;
pub use error::{ErrorKind, RejectReason, SinkError};
pub use event::{CallerIdentity, PermissionEvent};
pub use pipeline::{Accepted, FrontDoor, Pipeline, WriterState, WriterStats};
pub use record::{decode_record, escape_field, DecodedRecord, RecordEncoder, Records};
pub use sink::{AppendFileSink, RecordSink};
