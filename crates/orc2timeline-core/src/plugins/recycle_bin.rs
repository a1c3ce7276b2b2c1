//! RecycleBin plugin: `$I` deletion records.

use std::io::Read;

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};

use crate::errors::PluginError;
use crate::event::{filetime_to_utc, Event};
use crate::extract::Artefact;
use crate::plugin::{EventSink, TimelinePlugin};

/// Fixed UTF-16 name field length of the Vista/7 layout, in bytes.
const V1_NAME_BYTES: usize = 520;

pub struct RecycleBinToTimeline;

impl TimelinePlugin for RecycleBinToTimeline {
    fn parse_artefact(
        &mut self,
        artefact: &Artefact,
        sink: &mut EventSink<'_>,
    ) -> Result<(), PluginError> {
        let mut raw = Vec::new();
        std::fs::File::open(&artefact.path)?.read_to_end(&mut raw)?;
        match parse_record(&raw) {
            Ok(record) => {
                let mut event = Event::at(record.deleted_at);
                event.description = format!(
                    "Deletion of file {} - Filesize : {}",
                    record.file_path, record.file_size
                );
                event.source = artefact.source_hint().to_string();
                sink.emit(event)
            }
            Err(message) => {
                tracing::warn!(
                    host = sink.hostname(),
                    file = %artefact.file_name(),
                    error = message,
                    "error while parsing recycle bin record"
                );
                Ok(())
            }
        }
    }
}

struct DeletionRecord {
    file_size: i64,
    deleted_at: DateTime<Utc>,
    file_path: String,
}

fn parse_record(raw: &[u8]) -> Result<DeletionRecord, String> {
    if raw.len() < 24 {
        return Err(format!("record too short: {} bytes", raw.len()));
    }
    let header = LittleEndian::read_i64(&raw[0..8]);
    let file_size = LittleEndian::read_i64(&raw[8..16]);
    let filetime = LittleEndian::read_i64(&raw[16..24]);

    let deleted_at = filetime_to_utc(filetime)
        .ok_or_else(|| format!("deletion timestamp out of range: {filetime}"))?;

    let file_path = match header {
        // Windows Vista / 7: fixed-length name field.
        1 => {
            let end = raw.len().min(24 + V1_NAME_BYTES);
            decode_utf16_until_nul(&raw[24..end])
        }
        // Windows 10 and later: length-prefixed name.
        2 => {
            if raw.len() < 28 {
                return Err("truncated v2 record".to_string());
            }
            let chars = LittleEndian::read_i32(&raw[24..28]).max(0) as usize;
            let end = raw.len().min(28 + chars * 2);
            decode_utf16_until_nul(&raw[28..end])
        }
        other => return Err(format!("unexpected header value : {other}")),
    };

    Ok(DeletionRecord {
        file_size,
        deleted_at,
        file_path,
    })
}

fn decode_utf16_until_nul(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(LittleEndian::read_u16)
        .take_while(|&unit| unit != 0)
        .collect();
    String::from_utf16_lossy(&units)
}
