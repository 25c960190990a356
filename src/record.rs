// ============================================================================
// src/record.rs – LogRecord encoding (CSV-style) and decoding
// ============================================================================
//! One record per event:
//!
//! ```text
//! "2024-05-01T12:51:30.123+0000",1714567890123,"pkgmgr","com.example.app","android.permission.CAMERA","denied","policy rule 7"
//! ```
//!
//! String fields that contain `"`, `,`, CR or LF are quoted with inner quotes
//! doubled, so a quoted field may span physical lines. Epoch millis are never
//! quoted.

use crate::event::PermissionEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use thiserror::Error;

/// ISO-8601 with milliseconds and a numeric offset, e.g. `2024-05-01T12:34:56.789+0000`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

/// Formatted timestamp, epoch millis, source, package, permission, outcome, details.
pub const FIELD_COUNT: usize = 7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStyle {
    /// Quote every non-empty string field. Empty fields stay bare.
    #[default]
    Always,
    /// Quote only fields that contain a quote, comma, CR or LF.
    Necessary,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordTimezone {
    #[default]
    Utc,
    Local,
}

/// Format epoch millis for the first field. `None` when the instant falls
/// outside the calendar range chrono can represent.
pub fn format_timestamp(millis: i64, tz: RecordTimezone) -> Option<String> {
    let secs = millis.div_euclid(1000);
    let nanos = (millis.rem_euclid(1000) * 1_000_000) as u32;
    let utc: DateTime<Utc> = DateTime::from_timestamp(secs, nanos)?;
    let formatted = match tz {
        RecordTimezone::Utc => utc.format(TIMESTAMP_FORMAT).to_string(),
        RecordTimezone::Local => utc
            .with_timezone(&chrono::Local)
            .format(TIMESTAMP_FORMAT)
            .to_string(),
    };
    Some(formatted)
}

pub fn needs_quoting(field: &str) -> bool {
    field.contains(['"', ',', '\r', '\n'])
}

/// Double every quote and wrap the whole field in quotes.
pub fn quote_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len() + 2);
    out.push('"');
    out.push_str(&field.replace('"', "\"\""));
    out.push('"');
    out
}

/// Minimal escaping: untouched unless the field needs quoting.
pub fn escape_field(field: &str) -> Cow<'_, str> {
    if needs_quoting(field) {
        Cow::Owned(quote_field(field))
    } else {
        Cow::Borrowed(field)
    }
}

fn encode_field(field: &str, style: QuoteStyle) -> Cow<'_, str> {
    match style {
        QuoteStyle::Always if field.is_empty() => Cow::Borrowed(""),
        QuoteStyle::Always => Cow::Owned(quote_field(field)),
        QuoteStyle::Necessary => escape_field(field),
    }
}

/// Turns events into newline-terminated record text.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordEncoder {
    pub quote_style: QuoteStyle,
    pub timezone: RecordTimezone,
}

impl RecordEncoder {
    pub fn new(quote_style: QuoteStyle, timezone: RecordTimezone) -> Self {
        Self {
            quote_style,
            timezone,
        }
    }

    pub fn encode(&self, event: &PermissionEvent) -> String {
        let formatted = format_timestamp(event.timestamp_millis, self.timezone).unwrap_or_else(|| {
            tracing::debug!(
                millis = event.timestamp_millis,
                "timestamp outside calendar range; formatted field left empty"
            );
            String::new()
        });
        let millis = event.timestamp_millis.to_string();
        let style = self.quote_style;

        let fields = [
            encode_field(&formatted, style),
            Cow::Borrowed(millis.as_str()),
            encode_field(&event.source_component, style),
            encode_field(&event.package_name, style),
            encode_field(&event.permission, style),
            encode_field(&event.outcome, style),
            encode_field(event.details_or_empty(), style),
        ];

        let mut line = fields.join(",");
        line.push('\n');
        line
    }
}

// ----------------------------------------------------------------------------
// Decoding
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRecord {
    pub formatted_timestamp: String,
    pub timestamp_millis: i64,
    pub source_component: String,
    pub package_name: String,
    pub permission: String,
    pub outcome: String,
    pub details: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("unterminated quoted field")]
    UnterminatedQuote,
    #[error("unexpected {found:?} after closing quote at byte {offset}")]
    StrayAfterQuote { found: char, offset: usize },
    #[error("expected 7 fields, found {0}")]
    FieldCount(usize),
    #[error("epoch millis field is not an integer: {0:?}")]
    BadMillis(String),
    #[error("record is missing its trailing line feed")]
    MissingTerminator,
    #[error("trailing data after record")]
    TrailingData,
}

/// Split one record off the front of `input`.
///
/// Returns the raw fields, the number of bytes consumed (terminator included)
/// and whether a terminating LF was seen.
fn split_record(input: &str) -> Result<(Vec<String>, usize, bool), RecordError> {
    let mut fields = Vec::with_capacity(FIELD_COUNT);
    let mut field = String::new();
    let mut chars = input.char_indices().peekable();
    let mut at_field_start = true;

    loop {
        match chars.next() {
            None => {
                fields.push(field);
                return Ok((fields, input.len(), false));
            }
            Some((i, '\n')) => {
                fields.push(field);
                return Ok((fields, i + 1, true));
            }
            Some((_, ',')) => {
                fields.push(std::mem::take(&mut field));
                at_field_start = true;
            }
            Some((_, '"')) if at_field_start => {
                loop {
                    match chars.next() {
                        None => return Err(RecordError::UnterminatedQuote),
                        Some((_, '"')) => {
                            if matches!(chars.peek(), Some(&(_, '"'))) {
                                chars.next();
                                field.push('"');
                            } else {
                                break;
                            }
                        }
                        Some((_, c)) => field.push(c),
                    }
                }
                match chars.peek() {
                    None | Some(&(_, ',')) | Some(&(_, '\n')) => {}
                    Some(&(offset, found)) => {
                        return Err(RecordError::StrayAfterQuote { found, offset })
                    }
                }
                at_field_start = false;
            }
            Some((_, c)) => {
                field.push(c);
                at_field_start = false;
            }
        }
    }
}

fn into_record(fields: Vec<String>) -> Result<DecodedRecord, RecordError> {
    if fields.len() != FIELD_COUNT {
        return Err(RecordError::FieldCount(fields.len()));
    }
    let mut it = fields.into_iter();
    let mut next = || it.next().unwrap_or_default();

    let formatted_timestamp = next();
    let raw_millis = next();
    let timestamp_millis = raw_millis
        .parse::<i64>()
        .map_err(|_| RecordError::BadMillis(raw_millis.clone()))?;

    Ok(DecodedRecord {
        formatted_timestamp,
        timestamp_millis,
        source_component: next(),
        package_name: next(),
        permission: next(),
        outcome: next(),
        details: next(),
    })
}

/// Decode exactly one record. The trailing LF is optional.
pub fn decode_record(text: &str) -> Result<DecodedRecord, RecordError> {
    let (fields, consumed, _) = split_record(text)?;
    if consumed != text.len() {
        return Err(RecordError::TrailingData);
    }
    into_record(fields)
}

/// Iterates the records of a whole log file. Stops after the first error.
#[derive(Debug)]
pub struct Records<'a> {
    rest: &'a str,
    offset: usize,
    failed: bool,
}

impl<'a> Records<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            rest: text,
            offset: 0,
            failed: false,
        }
    }

    /// Byte offset of the next record to be yielded.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl Iterator for Records<'_> {
    type Item = Result<DecodedRecord, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.rest.is_empty() {
            return None;
        }
        let outcome = split_record(self.rest).and_then(|(fields, consumed, terminated)| {
            if !terminated {
                return Err(RecordError::MissingTerminator);
            }
            let record = into_record(fields)?;
            self.rest = &self.rest[consumed..];
            self.offset += consumed;
            Ok(record)
        });
        if outcome.is_err() {
            self.failed = true;
        }
        Some(outcome)
    }
}
