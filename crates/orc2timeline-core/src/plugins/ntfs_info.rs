//! NTFSInfo plugin: MFT metadata CSVs into MACB-annotated events.
//!
//! Each row carries eight timestamps ($SI and $FN MACB). Fields sharing one
//! value are grouped into a single event whose description marks which MACB
//! letters that instant covers, so a file touched once does not fan out into
//! eight identical-looking rows.

use csv::{ReaderBuilder, StringRecord};

use crate::errors::PluginError;
use crate::event::Event;
use crate::extract::Artefact;
use crate::plugin::{EventSink, TimelinePlugin};
use crate::plugins::csv_field;

const SI_FIELDS: [(&str, char); 4] = [
    ("LastModificationDate", 'M'),
    ("LastAccessDate", 'A'),
    ("LastAttrChangeDate", 'C'),
    ("CreationDate", 'B'),
];
const FN_FIELDS: [(&str, char); 4] = [
    ("FileNameLastModificationDate", 'M'),
    ("FileNameLastAccessDate", 'A'),
    ("FileNameLastAttrModificationDate", 'C'),
    ("FileNameCreationDate", 'B'),
];

#[derive(Default)]
pub struct NtfsInfoToTimeline {
    /// Joiner between ParentName and File, derived from the first row; the
    /// collector emits parent paths both with and without a trailing
    /// backslash depending on volume root.
    separator: Option<&'static str>,
}

impl NtfsInfoToTimeline {
    fn separator_for(&mut self, parent_name: &str) -> &'static str {
        *self.separator.get_or_insert_with(|| {
            if parent_name.is_empty() || !parent_name.ends_with('\\') {
                "\\"
            } else {
                ""
            }
        })
    }

    fn emit_grouped(
        &mut self,
        record: &StringRecord,
        headers: &StringRecord,
        source_file: &str,
        group: &[&str],
        timestamp: &str,
        sink: &mut EventSink<'_>,
    ) -> Result<(), PluginError> {
        let mut meaning = String::from("$SI: ");
        for (field, letter) in SI_FIELDS {
            meaning.push(if group.contains(&field) { letter } else { '.' });
        }
        meaning.push_str(" - $FN: ");
        for (field, letter) in FN_FIELDS {
            meaning.push(if group.contains(&field) { letter } else { '.' });
        }

        let parent_name = csv_field(record, headers, "ParentName").unwrap_or("");
        let separator = self.separator_for(parent_name);
        let file_name = csv_field(record, headers, "File").unwrap_or("");
        let size = csv_field(record, headers, "SizeInBytes").unwrap_or("unknown");

        let mut event = Event::at_str(timestamp);
        event.description = format!(
            "{meaning} - Name: {parent_name}{separator}{file_name} - Size in bytes: {size}"
        );
        event.source = source_file.to_string();
        sink.emit(event)
    }

    fn parse_row(
        &mut self,
        record: &StringRecord,
        headers: &StringRecord,
        source_file: &str,
        sink: &mut EventSink<'_>,
    ) -> Result<(), PluginError> {
        // FN-only entries carry no usable $SI view.
        if csv_field(record, headers, "FilenameFlags") == Some("2") {
            return Ok(());
        }

        let mut fields: Vec<&str> = SI_FIELDS
            .iter()
            .chain(FN_FIELDS.iter())
            .map(|(field, _)| *field)
            .collect();

        while let Some(reference) = fields.pop() {
            let Some(reference_ts) = csv_field(record, headers, reference) else {
                continue;
            };
            let mut group: Vec<&str> = vec![reference];
            group.extend(
                fields
                    .iter()
                    .copied()
                    .filter(|field| csv_field(record, headers, field) == Some(reference_ts)),
            );
            self.emit_grouped(record, headers, source_file, &group, reference_ts, sink)?;
            fields.retain(|field| !group.contains(field));
        }
        Ok(())
    }
}

impl TimelinePlugin for NtfsInfoToTimeline {
    fn parse_artefact(
        &mut self,
        artefact: &Artefact,
        sink: &mut EventSink<'_>,
    ) -> Result<(), PluginError> {
        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .from_path(&artefact.path)
            .map_err(|e| PluginError::parse(&artefact.path, e))?;
        let headers = reader
            .headers()
            .map_err(|e| PluginError::parse(&artefact.path, e))?
            .clone();
        let source_file = artefact.file_name();

        for record in reader.records() {
            match record {
                Ok(record) => self.parse_row(&record, &headers, &source_file, sink)?,
                Err(e) => {
                    tracing::debug!(file = %source_file, error = %e, "bad NTFSInfo row");
                }
            }
        }
        Ok(())
    }
}
