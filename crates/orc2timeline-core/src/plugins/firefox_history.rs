//! Firefox history plugin: `places.sqlite` visit log.

use chrono::DateTime;
use rusqlite::{Connection, OpenFlags};

use crate::errors::PluginError;
use crate::event::Event;
use crate::extract::Artefact;
use crate::plugin::{EventSink, TimelinePlugin};

const VISITS_QUERY: &str = "\
SELECT moz_places.url, moz_places.title, moz_places.visit_count, \
moz_historyvisits.visit_date, moz_places.typed, \
(SELECT moz_places.url FROM moz_places WHERE moz_historyvisits.from_visit = moz_places.id) \
AS referer_name \
FROM moz_places, moz_historyvisits \
WHERE moz_places.id = moz_historyvisits.place_id";

pub struct FirefoxHistoryToTimeline;

impl TimelinePlugin for FirefoxHistoryToTimeline {
    fn parse_artefact(
        &mut self,
        artefact: &Artefact,
        sink: &mut EventSink<'_>,
    ) -> Result<(), PluginError> {
        let name = artefact.file_name();
        // Write-ahead-log siblings match the same pattern but are not
        // standalone databases.
        if name.contains("places.sqlite-wal") || name.contains("places.sqlite-shm") {
            return Ok(());
        }

        let connection =
            Connection::open_with_flags(&artefact.path, OpenFlags::SQLITE_OPEN_READ_ONLY)
                .map_err(|e| PluginError::parse(&artefact.path, e))?;
        let mut statement = connection
            .prepare(VISITS_QUERY)
            .map_err(|e| PluginError::parse(&artefact.path, e))?;

        let mut rows = statement
            .query([])
            .map_err(|e| PluginError::parse(&artefact.path, e))?;
        while let Some(row) = rows.next().map_err(|e| PluginError::parse(&artefact.path, e))? {
            let url: String = row.get(0).unwrap_or_default();
            let title: Option<String> = row.get(1).unwrap_or(None);
            let visit_count: i64 = row.get(2).unwrap_or(0);
            let visit_date: i64 = row.get(3).unwrap_or(0);
            let typed: i64 = row.get(4).unwrap_or(0);
            let referer: Option<String> = row.get(5).unwrap_or(None);

            let Some(timestamp) = DateTime::from_timestamp_micros(visit_date) else {
                continue;
            };
            let mut event = Event::at(timestamp);
            event.description = format!(
                "Url: {url} - Title: {} - Count: {visit_count} - Typed: {typed} - Referer: {}",
                title.unwrap_or_default(),
                referer.unwrap_or_default()
            );
            event.source = artefact.source_hint().to_string();
            sink.emit(event)?;
        }
        Ok(())
    }
}
