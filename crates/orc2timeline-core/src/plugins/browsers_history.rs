//! BrowsersHistory plugin: generic SQLite browser databases.
//!
//! Unlike the Firefox-specific plugin this one dumps every table of every
//! collected database, so it works across Chromium, Edge and friends whose
//! file naming is not consistent enough for a tighter match pattern. Which
//! column of a table carries the event timestamp comes from the optional
//! `BrowsersHistoryToTimeline-timestampmap.json` auxiliary file; rows of
//! unmapped tables carry no timestamp and are dropped at emission.
//!
//! No file header is declared: WAL siblings match the same pattern but start
//! with a different magic than the main database, and a single header cannot
//! cover both.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::Connection;

use crate::errors::PluginError;
use crate::event::Event;
use crate::extract::Artefact;
use crate::plugin::{EventSink, TimelinePlugin};

const TIMESTAMP_MAP_FILE: &str = "BrowsersHistoryToTimeline-timestampmap.json";
/// Webkit/Chromium timestamps count microseconds since 1601.
const WEBKIT_EPOCH_OFFSET_MICROS: i64 = 11_644_473_600_000_000;

pub struct BrowsersHistoryToTimeline {
    /// table name -> column holding that table's event timestamp.
    timestamp_map: HashMap<String, String>,
}

impl BrowsersHistoryToTimeline {
    pub fn new(aux_dir: &Path) -> Self {
        Self {
            timestamp_map: parse_timestamp_map(aux_dir),
        }
    }
}

impl TimelinePlugin for BrowsersHistoryToTimeline {
    fn parse_artefact(
        &mut self,
        artefact: &Artefact,
        sink: &mut EventSink<'_>,
    ) -> Result<(), PluginError> {
        let name = artefact.file_name();
        if name.contains("-wal") || name.contains("-shm") {
            return Ok(());
        }

        checkpoint_wal(&artefact.path);

        let connection = Connection::open(&artefact.path)
            .map_err(|e| PluginError::parse(&artefact.path, e))?;
        let tables: Vec<String> = {
            let mut statement = connection
                .prepare("SELECT name FROM sqlite_master WHERE type = 'table'")
                .map_err(|e| PluginError::parse(&artefact.path, e))?;
            let names = statement
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| PluginError::parse(&artefact.path, e))?;
            names.filter_map(Result::ok).collect()
        };

        for table in &tables {
            if let Err(e) = self.dump_table(&connection, table, &name, sink) {
                tracing::warn!(
                    file = %name,
                    table,
                    error = %e,
                    "unable to parse table, skipping"
                );
            }
        }
        Ok(())
    }
}

impl BrowsersHistoryToTimeline {
    fn dump_table(
        &self,
        connection: &Connection,
        table: &str,
        source: &str,
        sink: &mut EventSink<'_>,
    ) -> Result<(), PluginError> {
        let quoted = table.replace('"', "\"\"");
        let mut statement = connection
            .prepare(&format!("SELECT * FROM \"{quoted}\""))
            .map_err(|e| PluginError::parse(Path::new(source), e))?;
        let columns: Vec<String> = statement
            .column_names()
            .iter()
            .map(|c| (*c).to_string())
            .collect();
        let timestamp_column = self.timestamp_map.get(table);

        let mut rows = statement
            .query([])
            .map_err(|e| PluginError::parse(Path::new(source), e))?;
        while let Some(row) = rows
            .next()
            .map_err(|e| PluginError::parse(Path::new(source), e))?
        {
            let mut description = format!("TableName: {table} - ");
            let mut timestamp: Option<DateTime<Utc>> = None;
            for (index, column) in columns.iter().enumerate() {
                let value: Value = row.get(index).unwrap_or(Value::Null);
                description.push_str(&format!("{column}: {} - ", render_value(&value)));
                if timestamp_column == Some(column) {
                    if let Value::Integer(raw) = value {
                        timestamp = timestamp_from_column(raw);
                    }
                }
            }

            let Some(timestamp) = timestamp else { continue };
            let mut event = Event::at(timestamp);
            event.description = description;
            event.source = source.to_string();
            sink.emit(event)?;
        }
        Ok(())
    }
}

/// Replay pending WAL transactions into the main database, when the `-wal`
/// and `-shm` siblings were extracted next to it. Failure only means the
/// database is read as collected.
fn checkpoint_wal(database: &Path) {
    let result = Connection::open(database).and_then(|connection| {
        let integrity: String =
            connection.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        tracing::debug!(db = %database.display(), integrity, "database integrity check");
        connection.query_row("PRAGMA wal_checkpoint(FULL)", [], |row| {
            let busy: i64 = row.get(0)?;
            let log: i64 = row.get(1)?;
            let checkpointed: i64 = row.get(2)?;
            tracing::debug!(busy, log, checkpointed, "replayed write-ahead log");
            Ok(())
        })
    });
    if let Err(e) = result {
        tracing::warn!(db = %database.display(), error = %e, "unable to replay database transactions");
    }
}

/// Interpret a mapped timestamp column. Small values are microsecond Unix
/// stamps; larger ones are Webkit/Chromium microseconds since 1601.
fn timestamp_from_column(raw: i64) -> Option<DateTime<Utc>> {
    if raw <= 0 {
        return None;
    }
    if raw < 1_000_000_000 {
        DateTime::from_timestamp_micros(raw)
    } else {
        DateTime::from_timestamp_micros(raw.checked_sub(WEBKIT_EPOCH_OFFSET_MICROS)?)
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Integer(v) => v.to_string(),
        Value::Real(v) => v.to_string(),
        Value::Text(s) => s.clone(),
        Value::Blob(bytes) => {
            let mut hex = String::with_capacity(bytes.len() * 2);
            for byte in bytes {
                hex.push_str(&format!("{byte:02x}"));
            }
            hex
        }
    }
}

fn parse_timestamp_map(aux_dir: &Path) -> HashMap<String, String> {
    let path = aux_dir.join(TIMESTAMP_MAP_FILE);
    let Ok(text) = std::fs::read_to_string(&path) else {
        tracing::debug!(file = %path.display(), "no timestamp map, every table is dumped without timestamps");
        return HashMap::new();
    };
    match serde_json::from_str(&text) {
        Ok(map) => map,
        Err(e) => {
            tracing::warn!(file = %path.display(), error = %e, "unreadable timestamp map");
            HashMap::new()
        }
    }
}
