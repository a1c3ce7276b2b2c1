//! Registry plugin: regf hives.
//!
//! Every key yields one event at its last-written time. Keys listed in the
//! optional `RegistryToTimeline-important-keys.txt` auxiliary file
//! additionally dump their values. The hive parser family is registered with
//! `needs_parser_lock`, so instances of this plugin never run concurrently.

use std::collections::HashSet;
use std::path::Path;

use notatin::cell_value::CellValue;
use notatin::parser::ParserIterator;
use notatin::parser_builder::ParserBuilder;

use crate::errors::PluginError;
use crate::event::Event;
use crate::extract::Artefact;
use crate::plugin::{EventSink, TimelinePlugin};
use crate::plugins::read_aux_lines;

const IMPORTANT_KEYS_FILE: &str = "RegistryToTimeline-important-keys.txt";
/// regf magic.
const REGF_HEADER: [u8; 4] = [0x72, 0x65, 0x67, 0x66];

/// Windows registry type name for a decoded value, matching the names the
/// registry APIs use (RegSZ, RegDWord, ...).
pub(crate) fn value_type_name(content: &CellValue) -> &'static str {
    match content {
        CellValue::String(_) => "RegSZ",
        CellValue::MultiString(_) => "RegMultiSZ",
        CellValue::U32(_) | CellValue::I32(_) => "RegDWord",
        CellValue::U64(_) | CellValue::I64(_) => "RegQWord",
        CellValue::Binary(_) => "RegBin",
        CellValue::None => "RegNone",
        _ => "RegUnknown",
    }
}

/// Human-readable rendition of a decoded value: strings as-is, multi-strings
/// `|`-joined, integers in decimal, binary as hex.
pub(crate) fn readable_value(content: &CellValue) -> String {
    match content {
        CellValue::String(s) => s.clone(),
        CellValue::MultiString(items) => items.join("|"),
        CellValue::U32(v) => v.to_string(),
        CellValue::I32(v) => v.to_string(),
        CellValue::U64(v) => v.to_string(),
        CellValue::I64(v) => v.to_string(),
        CellValue::Binary(bytes) => {
            let mut hex = String::with_capacity(bytes.len() * 2);
            for byte in bytes {
                hex.push_str(&format!("{byte:02x}"));
            }
            hex
        }
        other => format!("{other:?}"),
    }
}

pub struct RegistryToTimeline {
    important_keys: HashSet<String>,
}

impl RegistryToTimeline {
    pub fn new(aux_dir: &Path) -> Self {
        Self {
            important_keys: read_aux_lines(aux_dir, IMPORTANT_KEYS_FILE)
                .into_iter()
                .collect(),
        }
    }
}

impl TimelinePlugin for RegistryToTimeline {
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
            let written = key.last_key_written_date_and_time();
            let key_path = key.path.clone();

            let mut event = Event::at(written);
            event.description = key_path.clone();
            event.source = source.clone();
            sink.emit(event)?;

            if self.important_keys.contains(&key_path) {
                for value in key.value_iter() {
                    let (content, _) = value.get_content();
                    let mut event = Event::at(written);
                    event.description = format!(
                        "KeyPath: {key_path} - ValueName: {} - ValueType: {} - ValueData: {}",
                        value.get_pretty_name(),
                        value_type_name(&content),
                        readable_value(&content),
                    );
                    event.source = source.clone();
                    sink.emit(event)?;
                }
            }
        }
        Ok(())
    }
}
