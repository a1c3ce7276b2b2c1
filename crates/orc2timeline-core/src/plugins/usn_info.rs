//! USNInfo plugin: one event per USN journal record.

use csv::ReaderBuilder;

use crate::errors::PluginError;
use crate::event::Event;
use crate::extract::Artefact;
use crate::plugin::{EventSink, TimelinePlugin};
use crate::plugins::csv_field;

pub struct UsnInfoToTimeline;

impl TimelinePlugin for UsnInfoToTimeline {
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

        for record in reader.records() {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    tracing::debug!(file = %artefact.file_name(), error = %e, "bad USNInfo row");
                    continue;
                }
            };
            // USNInfo files can be concatenated; repeated header rows are
            // recognisable by the literal column name.
            if csv_field(&record, &headers, "USN") == Some("USN") {
                continue;
            }
            let Some(timestamp) = csv_field(&record, &headers, "TimeStamp") else {
                continue;
            };
            let frn = csv_field(&record, &headers, "FRN").unwrap_or("");
            let segment = match mft_segment_number(frn) {
                Some(segment) => segment,
                None => {
                    tracing::warn!(frn, "error while getting FRN");
                    0
                }
            };
            let full_path = csv_field(&record, &headers, "FullPath").unwrap_or("");
            let reason = csv_field(&record, &headers, "Reason").unwrap_or("");

            let mut event = Event::at_str(timestamp);
            event.description =
                format!("{full_path} - {reason} - MFT segment num : {segment}");
            event.source = artefact.file_name();
            sink.emit(event)?;
        }
        Ok(())
    }
}

/// Low 32 bits of the file reference number, which hold the MFT segment.
fn mft_segment_number(frn: &str) -> Option<u64> {
    let digits = frn.trim().trim_start_matches("0x");
    u64::from_str_radix(digits, 16)
        .ok()
        .map(|value| value & 0xFFFF_FFFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sorter::ExternalSorter;
    use std::path::PathBuf;

    fn artefact(path: PathBuf) -> Artefact {
        Artefact {
            member_path: path.file_name().unwrap().to_string_lossy().into_owned(),
            path,
            original_path: None,
        }
    }

    #[test]
    fn masks_frn_to_segment_number() {
        assert_eq!(mft_segment_number("0x0001000000001a2b"), Some(0x1a2b));
        assert_eq!(mft_segment_number("2A"), Some(0x2a));
        assert_eq!(mft_segment_number("zz"), None);
    }

    #[test]
    fn emits_one_event_per_row_and_skips_repeated_headers() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("USNInfo.csv");
        std::fs::write(
            &csv_path,
            "USN,TimeStamp,FullPath,FRN,Reason\n\
             1,2021-01-02 03:04:05.678,\\Windows\\foo.dll,0x100000000001f,CLOSE\n\
             USN,TimeStamp,FullPath,FRN,Reason\n\
             2,2021-01-02 03:04:06.000,\\Windows\\bar.dll,0x20,CREATE\n",
        )
        .unwrap();

        let mut sorter = ExternalSorter::new(&dir.path().join("runs"), 16);
        let mut sink = EventSink::new("HOST", "USN journal", &mut sorter);
        UsnInfoToTimeline
            .parse_artefact(&artefact(csv_path), &mut sink)
            .unwrap();

        let out = dir.path().join("partial");
        assert_eq!(sorter.finish(&out).unwrap(), 2);
        let text = std::fs::read_to_string(&out).unwrap();
        assert!(text.contains("\\Windows\\foo.dll - CLOSE - MFT segment num : 31"));
        assert!(text.contains("USNInfo.csv"));
    }
}
