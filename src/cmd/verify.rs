// ============================================================================
// src/cmd/verify.rs – Check that every record in the log file decodes
// ============================================================================

use crate::record::{DecodedRecord, RecordError, Records};
use crate::ui::UX;
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::Path;

#[derive(Debug, PartialEq, Eq)]
pub struct VerifySummary {
    pub records: usize,
    pub first_timestamp: Option<i64>,
    pub last_timestamp: Option<i64>,
    /// Byte offset and cause of the first record that failed to decode.
    pub malformed: Option<(usize, RecordError)>,
}

pub fn run_verify(ui: &UX, path: &Path) -> Result<()> {
    ui.phase("Permission Log Sink // Record Verification");

    let summary = verify_file(path)?;
    ui.info(&format!("{}: {} well-formed record(s)", path.display(), summary.records));
    if let (Some(first), Some(last)) = (summary.first_timestamp, summary.last_timestamp) {
        ui.info(&format!("caller timestamps span {first} .. {last} (ms, file order)"));
    }

    match summary.malformed {
        Some((offset, err)) => {
            ui.error(&format!("malformed record at byte {offset}: {err}"));
            Err(anyhow!("log file has a malformed record at byte {offset}"))
        }
        None => {
            ui.success("All records decode cleanly.");
            Ok(())
        }
    }
}

pub fn verify_file(path: &Path) -> Result<VerifySummary> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("read log file: {}", path.display()))?;
    Ok(verify_text(&text))
}

fn verify_text(text: &str) -> VerifySummary {
    let mut summary = VerifySummary {
        records: 0,
        first_timestamp: None,
        last_timestamp: None,
        malformed: None,
    };

    let mut records = Records::new(text);
    loop {
        let offset = records.offset();
        match records.next() {
            None => break,
            Some(Ok(DecodedRecord {
                timestamp_millis, ..
            })) => {
                summary.records += 1;
                summary.first_timestamp.get_or_insert(timestamp_millis);
                summary.last_timestamp = Some(timestamp_millis);
            }
            Some(Err(err)) => {
                summary.malformed = Some((offset, err));
                break;
            }
        }
    }
    summary
}
