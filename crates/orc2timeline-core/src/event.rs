//! Timeline events and timestamp normalisation.
//!
//! Every event is flattened to one CSV record
//! `Timestamp,Hostname,SourceType,Description,SourceFile` whose leading
//! timestamp uses a fixed-width UTC encoding, so byte order over encoded
//! lines equals temporal order and the external sorter never needs to decode
//! fields.

use std::io;

use chrono::{DateTime, NaiveDateTime, Utc};

/// Fixed-width, lexically sortable timestamp encoding (millisecond
/// precision).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// One artefact observation, as produced by a plugin.
///
/// Plugins hand over either a structured instant or a raw string scraped from
/// the artefact; `timestamp` wins when both are set. Events that end up with
/// neither, or with a string the permissive parser rejects, are dropped at
/// emission.
#[derive(Debug, Clone, Default)]
pub struct Event {
    pub timestamp: Option<DateTime<Utc>>,
    pub timestamp_str: Option<String>,
    pub description: String,
    /// Original Windows path when recoverable, in-archive path otherwise.
    pub source: String,
}

impl Event {
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp: Some(timestamp),
            ..Self::default()
        }
    }

    pub fn at_str(timestamp: impl Into<String>) -> Self {
        Self {
            timestamp_str: Some(timestamp.into()),
            ..Self::default()
        }
    }

    /// Resolve the effective UTC instant, if any.
    pub fn resolve_timestamp(&self) -> Option<DateTime<Utc>> {
        if let Some(ts) = self.timestamp {
            return Some(ts);
        }
        self.timestamp_str.as_deref().and_then(parse_timestamp)
    }
}

/// Accepted string layouts, tried in order after RFC 3339. Artefact CSVs use
/// space- or `T`-separated naive datetimes with an optional fraction; naive
/// values are taken as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
];

/// 1601-01-01 expressed in FILETIME ticks at the Unix epoch.
pub const EPOCH_AS_FILETIME: i64 = 116_444_736_000_000_000;

/// Convert a Windows FILETIME tick count (100 ns since 1601) to a UTC
/// instant. Returns `None` for values that fall outside the representable
/// range.
pub fn filetime_to_utc(filetime: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros((filetime - EPOCH_AS_FILETIME) / 10)
}

/// Permissive timestamp parsing, shared by every plugin.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive_part = trimmed.strip_suffix('Z').unwrap_or(trimmed);
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(naive_part, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

/// Encode one output record as a single CSV line (no trailing newline).
///
/// Embedded line breaks are escaped so each record stays on one physical
/// line; quoting follows RFC 4180 for commas and quotes.
pub fn encode_line(
    timestamp: &DateTime<Utc>,
    hostname: &str,
    source_type: &str,
    description: &str,
    source: &str,
) -> io::Result<String> {
    let ts = timestamp.format(TIMESTAMP_FORMAT).to_string();
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer
        .write_record([
            ts.as_str(),
            hostname,
            source_type,
            &escape_line_breaks(description),
            &escape_line_breaks(source),
        ])
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    let bytes = writer
        .into_inner()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    let mut line = String::from_utf8(bytes)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}

fn escape_line_breaks(field: &str) -> String {
    if !field.contains(['\n', '\r']) {
        return field.to_string();
    }
    field
        .replace("\r\n", "\\r\\n")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}
