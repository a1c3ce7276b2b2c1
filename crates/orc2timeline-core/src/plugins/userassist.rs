//! UserAssist plugin: GUI execution counters from NTUSER.DAT hives.
//!
//! Value names under `...\Explorer\UserAssist\{GUID}\Count` are ROT13-encoded
//! executable paths; the binary payload carries the run count and the last
//! run FILETIME (plus the focus time in the Windows 7+ layout). Known folder
//! GUID prefixes are rewritten to their usual paths.

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};
use notatin::cell_value::CellValue;
use notatin::parser::ParserIterator;
use notatin::parser_builder::ParserBuilder;

use crate::errors::PluginError;
use crate::event::{filetime_to_utc, Event, TIMESTAMP_FORMAT};
use crate::extract::Artefact;
use crate::plugin::{EventSink, TimelinePlugin};

/// regf magic, same as the plain registry plugin.
const REGF_HEADER: [u8; 4] = [0x72, 0x65, 0x67, 0x66];

/// Known-folder GUIDs that show up as value-name prefixes.
const GUID_TO_PATH: &[(&str, &str)] = &[
    ("{1AC14E77-02E7-4E5D-B744-2EB1AE5198B7}", "C:\\Windows\\System32"),
    ("{6D809377-6AF0-444B-8957-A3773F02200E}", "C:\\Program Files"),
    ("{7C5A40EF-A0FB-4BFC-874A-C0F2E0B9FA8E}", "C:\\Program Files (x86)"),
    ("{F38BF404-1D43-42F2-9305-67DE0B28FC23}", "C:\\Windows"),
    (
        "{0139D44E-6AFE-49F2-8690-3DAFCAE6FFB8}",
        "C:\\ProgramData\\Microsoft\\Windows\\Start Menu\\Programs",
    ),
    (
        "{9E3995AB-1F9C-4F13-B827-48B24B6C7174}",
        "%AppData%\\Roaming\\Microsoft\\Internet Explorer\\Quick Launch\\User Pinned",
    ),
    (
        "{A77F5D77-2E2B-44C3-A6A2-ABA601054A51}",
        "%AppData%\\Roaming\\Microsoft\\Windows\\Start Menu\\Programs",
    ),
    ("{D65231B0-B2F1-4857-A4CE-A8E7C6EA7D27}", "C:\\Windows\\SysWOW64"),
];

pub struct UserAssistToTimeline;

impl TimelinePlugin for UserAssistToTimeline {
    fn file_header(&self) -> Option<&[u8]> {
        Some(&REGF_HEADER)
    }

    fn parse_artefact(
        &mut self,
        artefact: &Artefact,
        sink: &mut EventSink<'_>,
    ) -> Result<(), PluginError> {
        let parser = ParserBuilder::from_path(artefact.path.clone())
            .recover_deleted(false)
            .build()
            .map_err(|e| PluginError::parse(&artefact.path, e))?;

        let source = artefact.source_hint().to_string();
        for key in ParserIterator::new(&parser).iter() {
            if key.path.rsplit('\\').next() != Some("Count") {
                continue;
            }
            if !key.path.contains("\\Explorer\\UserAssist\\") {
                continue;
            }
            let reg_time = key
                .last_key_written_date_and_time()
                .format(TIMESTAMP_FORMAT)
                .to_string();

            for value in key.value_iter() {
                let exec_path = decode_exec_path(&value.get_pretty_name());
                if exec_path.starts_with("UEME_CTL") {
                    continue;
                }
                let (content, _) = value.get_content();
                let CellValue::Binary(data) = content else {
                    continue;
                };
                let Some(entry) = parse_counter_entry(&data) else {
                    continue;
                };

                let mut event = Event::at(entry.last_run);
                event.description = match entry.focus_time {
                    Some(focus_time) => format!(
                        "ExecPath: {exec_path} - RunCount: {} - FocusTime: {focus_time} - \
RegistryTimestamp: {reg_time}",
                        entry.run_count
                    ),
                    None => format!(
                        "ExecPath: {exec_path} - RunCount: {} - RegistryTimestamp: {reg_time}",
                        entry.run_count
                    ),
                };
                event.source = source.clone();
                sink.emit(event)?;
            }
        }
        Ok(())
    }
}

struct CounterEntry {
    run_count: u32,
    /// Only present in the 72-byte Windows 7+ layout.
    focus_time: Option<u32>,
    last_run: DateTime<Utc>,
}

/// Decode one UserAssist counter payload. The 72-byte layout is Windows 7
/// and later; the 16-byte layout is XP/Vista, whose run count starts at 5.
fn parse_counter_entry(data: &[u8]) -> Option<CounterEntry> {
    match data.len() {
        72 => {
            let run_count = LittleEndian::read_u32(&data[4..8]);
            let focus_time = LittleEndian::read_u32(&data[12..16]);
            let filetime = LittleEndian::read_u64(&data[60..68]);
            Some(CounterEntry {
                run_count,
                focus_time: Some(focus_time),
                last_run: filetime_to_utc(filetime as i64)?,
            })
        }
        16 => {
            let run_count = LittleEndian::read_u32(&data[4..8]).wrapping_sub(5);
            let filetime = LittleEndian::read_u64(&data[8..16]);
            Some(CounterEntry {
                run_count,
                focus_time: None,
                last_run: filetime_to_utc(filetime as i64)?,
            })
        }
        _ => None,
    }
}

/// ROT13-decode a value name and rewrite a known-folder GUID prefix.
fn decode_exec_path(value_name: &str) -> String {
    let decoded = rot13(value_name);
    let prefix = decoded.split('\\').next().unwrap_or("");
    for (guid, path) in GUID_TO_PATH {
        if prefix == *guid {
            return decoded.replacen(guid, path, 1);
        }
    }
    decoded
}

fn rot13(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            'a'..='z' => (((c as u8 - b'a' + 13) % 26) + b'a') as char,
            'A'..='Z' => (((c as u8 - b'A' + 13) % 26) + b'A') as char,
            other => other,
        })
        .collect()
}
