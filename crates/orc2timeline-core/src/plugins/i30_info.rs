//! I30Info plugin: carved $I30 slack-space entries.

use csv::{ReaderBuilder, StringRecord};

use crate::errors::PluginError;
use crate::event::Event;
use crate::extract::Artefact;
use crate::plugin::{EventSink, TimelinePlugin};
use crate::plugins::csv_field;

const FN_FIELDS: [(&str, char); 4] = [
    ("FileNameLastModificationDate", 'M'),
    ("FileNameLastAccessDate", 'A'),
    ("FileNameLastAttrModificationDate", 'C'),
    ("FileNameCreationDate", 'B'),
];

pub struct I30InfoToTimeline;

impl I30InfoToTimeline {
    fn parse_row(
        record: &StringRecord,
        headers: &StringRecord,
        source_file: &str,
        sink: &mut EventSink<'_>,
    ) -> Result<(), PluginError> {
        // Live entries are already covered by the MFT view; only carved
        // slack-space entries add information.
        if csv_field(record, headers, "CarvedEntry") != Some("Y") {
            return Ok(());
        }

        let mut fields: Vec<&str> = FN_FIELDS.iter().map(|(field, _)| *field).collect();
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

            let mut meaning = String::new();
            for (field, letter) in FN_FIELDS {
                meaning.push(if group.contains(&field) { letter } else { '.' });
            }

            let name = csv_field(record, headers, "Name").unwrap_or("");
            let segment = csv_field(record, headers, "FRN")
                .and_then(|frn| {
                    u64::from_str_radix(frn.trim().trim_start_matches("0x"), 16).ok()
                })
                .map(|value| value & 0xFFFF_FFFF_FFFF)
                .unwrap_or(0);
            let parent_frn = csv_field(record, headers, "ParentFRN").unwrap_or("");

            let mut event = Event::at_str(reference_ts);
            event.description = format!(
                "Entry in slackspace - $FN: {meaning} - Name: {name} - \
MFT segment num: {segment} - Parent FRN: {parent_frn} "
            );
            event.source = source_file.to_string();
            sink.emit(event)?;

            fields.retain(|field| !group.contains(field));
        }
        Ok(())
    }
}

impl TimelinePlugin for I30InfoToTimeline {
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
                Ok(record) => Self::parse_row(&record, &headers, &source_file, sink)?,
                Err(e) => {
                    tracing::debug!(file = %source_file, error = %e, "bad I30Info row");
                }
            }
        }
        Ok(())
    }
}
