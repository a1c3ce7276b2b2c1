//! EventLogs plugin: Windows `.evtx` logs.
//!
//! Each record becomes `provider:event-id [tag] user-id (string data)`. Tags
//! come from the optional `EventLogsToTimeline-eventmap.txt` auxiliary file,
//! which labels noteworthy (provider, event-id) pairs, e.g.
//! `Microsoft-Windows-Security-Auditing/4624:Logon`.

use std::collections::HashMap;
use std::path::Path;

use evtx::EvtxParser;
use serde_json::Value;

use crate::errors::PluginError;
use crate::event::Event;
use crate::extract::Artefact;
use crate::plugin::{EventSink, TimelinePlugin};
use crate::plugins::read_aux_lines;

const EVENT_MAP_FILE: &str = "EventLogsToTimeline-eventmap.txt";

pub struct EventLogsToTimeline {
    event_tags: HashMap<(String, u16), String>,
}

impl EventLogsToTimeline {
    pub fn new(aux_dir: &Path) -> Self {
        Self {
            event_tags: parse_event_map(aux_dir),
        }
    }

    fn build_description(&self, provider: &str, event_id: u16, user_id: &str, args: &str) -> String {
        let mut description = format!("{provider}:{event_id}");
        if let Some(tag) = self.event_tags.get(&(provider.to_string(), event_id)) {
            description.push(' ');
            description.push_str(tag);
        }
        description.push(' ');
        description.push_str(user_id);
        if !args.is_empty() {
            description.push_str(&format!(" ({args})"));
        }
        description
    }
}

impl TimelinePlugin for EventLogsToTimeline {
    fn parse_artefact(
        &mut self,
        artefact: &Artefact,
        sink: &mut EventSink<'_>,
    ) -> Result<(), PluginError> {
        let mut parser = EvtxParser::from_path(&artefact.path)
            .map_err(|e| PluginError::parse(&artefact.path, e))?;

        for record in parser.records_json_value() {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    tracing::debug!(
                        file = %artefact.file_name(),
                        error = %e,
                        "error while parsing an event record"
                    );
                    continue;
                }
            };

            let system = &record.data["Event"]["System"];
            let provider = system["Provider"]["#attributes"]["Name"]
                .as_str()
                .unwrap_or("Unknown");
            let Some(event_id) = extract_event_id(&system["EventID"]) else {
                continue;
            };
            let user_id = system["Security"]["#attributes"]["UserID"]
                .as_str()
                .unwrap_or("-");
            let args = join_event_data(&record.data["Event"]["EventData"]);

            let mut event = Event::at(record.timestamp);
            event.description = self.build_description(provider, event_id, user_id, &args);
            event.source = artefact.source_hint().to_string();
            sink.emit(event)?;
        }
        Ok(())
    }
}

/// Event identifiers keep only the status code; facility, severity and
/// customer bits are masked off.
fn extract_event_id(value: &Value) -> Option<u16> {
    let raw = match value {
        Value::Number(n) => n.as_u64()?,
        Value::Object(map) => map.get("#text")?.as_u64()?,
        _ => return None,
    };
    Some((raw & 0xFFFF) as u16)
}

/// Flatten the EventData block into one space-separated string.
fn join_event_data(value: &Value) -> String {
    let Value::Object(map) = value else {
        return String::new();
    };
    let mut parts: Vec<String> = Vec::with_capacity(map.len());
    for (key, item) in map {
        if key == "#attributes" {
            continue;
        }
        match item {
            Value::Null => parts.push(String::new()),
            Value::String(s) => parts.push(s.clone()),
            Value::Array(items) => {
                for item in items {
                    parts.push(scalar_to_string(item));
                }
            }
            other => parts.push(scalar_to_string(other)),
        }
    }
    parts.join(" ")
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn parse_event_map(aux_dir: &Path) -> HashMap<(String, u16), String> {
    let mut tags = HashMap::new();
    for line in read_aux_lines(aux_dir, EVENT_MAP_FILE) {
        let Some((event, tag)) = line.split_once(':') else {
            tracing::warn!(line, "wrong format for a line in {EVENT_MAP_FILE}");
            continue;
        };
        let Some((provider, id)) = event.split_once('/') else {
            tracing::warn!(line, "wrong format for a line in {EVENT_MAP_FILE}");
            continue;
        };
        let Ok(id) = id.trim().parse::<u16>() else {
            tracing::warn!(line, "wrong format for a line in {EVENT_MAP_FILE}");
            continue;
        };
        tags.insert((provider.trim().to_string(), id), tag.trim().to_string());
    }
    tags
}
