//! AmCache plugin: application/driver inventory hives.
//!
//! Four sections of `Amcache.hve` are walked: `InventoryApplicationFile`,
//! `InventoryDriverBinary`, `File` and `Programs`. Each entry yields one
//! event at the key's last-written time plus extra events for the embedded
//! timestamps an entry may carry (link/compilation date, driver write time,
//! file creation and modification, program install and uninstall).

use chrono::{DateTime, NaiveDateTime, Utc};
use notatin::cell_key_node::CellKeyNode;
use notatin::cell_value::CellValue;
use notatin::parser::ParserIterator;
use notatin::parser_builder::ParserBuilder;

use crate::errors::PluginError;
use crate::event::{filetime_to_utc, Event};
use crate::extract::Artefact;
use crate::plugin::{EventSink, TimelinePlugin};
use crate::plugins::registry_hive::readable_value;

/// regf magic, same as the plain registry plugin.
const REGF_HEADER: [u8; 4] = [0x72, 0x65, 0x67, 0x66];
/// `LinkDate` and `DriverLastWriteTime` string layout.
const LINK_DATE_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

pub struct AmCacheToTimeline;

impl TimelinePlugin for AmCacheToTimeline {
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
            let segments: Vec<String> = key
                .path
                .split('\\')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            let Some(section) = segments.iter().position(|s| s == "Root") else {
                continue;
            };
            let below_root = &segments[section + 1..];
            match below_root.first().map(String::as_str) {
                Some("InventoryApplicationFile") if below_root.len() >= 2 => {
                    parse_application_file(&key, &source, sink)?;
                }
                Some("InventoryDriverBinary") if below_root.len() >= 2 => {
                    parse_driver_binary(&key, &source, sink)?;
                }
                // \Root\File\{volume guid}\{file reference}
                Some("File") if below_root.len() == 3 => {
                    parse_file_entry(&key, &source, sink)?;
                }
                Some("Programs") if below_root.len() >= 2 => {
                    parse_programs_entry(&key, &source, sink)?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn parse_application_file(
    key: &CellKeyNode,
    source: &str,
    sink: &mut EventSink<'_>,
) -> Result<(), PluginError> {
    let mut desc = vec![format!("KeyPath: {}", key.path)];
    if let Some(name) = value_string(key, "Name") {
        desc.push(format!("Name: {name}"));
    }
    if let Some(path) = value_string(key, "LowerCaseLongPath") {
        desc.push(format!("ExecPath: {path}"));
    }
    if let Some(sha1) = value_string(key, "FileId").as_deref().and_then(strip_sha1) {
        desc.push(format!("SHA1: {sha1}"));
    }
    if let Some(size) = value_string(key, "Size") {
        desc.push(format!("FileSize: {size}"));
    }
    let desc = desc.join(" - ");

    emit(sink, key_written(key), source, "Key last modified timestamp", &desc)?;
    if let Some(link_date) = value_string(key, "LinkDate").as_deref().and_then(parse_link_date) {
        emit(sink, link_date, source, "Compilation timestamp", &desc)?;
    }
    Ok(())
}

fn parse_driver_binary(
    key: &CellKeyNode,
    source: &str,
    sink: &mut EventSink<'_>,
) -> Result<(), PluginError> {
    let mut desc = vec![format!("KeyPath: {}", key.path)];
    if let Some(name) = value_string(key, "DriverName") {
        desc.push(format!("Name: {name}"));
    }
    if let Some(path) = value_string(key, "LowerCaseLongPath") {
        desc.push(format!("DriverPath: {path}"));
    }
    // The sha1 lives either in DriverId or in the key name itself.
    if let Some(sha1) = value_string(key, "DriverId").as_deref().and_then(strip_sha1) {
        desc.push(format!("SHA1: {sha1}"));
    } else if let Some(sha1) = key_name(key).strip_prefix("0000") {
        desc.push(format!("SHA1: {sha1}"));
    }
    if let Some(size) = value_string(key, "ImageSize") {
        desc.push(format!("FileSize: {size}"));
    }
    let desc = desc.join(" - ");

    emit(sink, key_written(key), source, "Key last modified timestamp", &desc)?;
    if let Some(written) = value_string(key, "DriverLastWriteTime")
        .as_deref()
        .and_then(parse_link_date)
    {
        emit(sink, written, source, "Driver Last Write time", &desc)?;
    }
    Ok(())
}

fn parse_file_entry(
    key: &CellKeyNode,
    source: &str,
    sink: &mut EventSink<'_>,
) -> Result<(), PluginError> {
    let mut desc = vec![format!("KeyPath: {}", key.path)];
    if let Some(path) = value_string(key, "15") {
        desc.push(format!("ExecPath: {path}"));
    }
    if let Some(sha1) = value_string(key, "101").as_deref().and_then(strip_sha1) {
        desc.push(format!("SHA1: {sha1}"));
    }
    if let Some(size) = value_string(key, "6") {
        desc.push(format!("FileSize: {size}"));
    }
    let desc = desc.join(" - ");

    emit(sink, key_written(key), source, "Key last modified timestamp", &desc)?;
    if let Some(modified) = value_u64(key, "17").and_then(|v| filetime_to_utc(v as i64)) {
        emit(sink, modified, source, "Modification time", &desc)?;
    }
    if let Some(created) = value_u64(key, "12").and_then(|v| filetime_to_utc(v as i64)) {
        emit(sink, created, source, "Creation time", &desc)?;
    }
    if let Some(compiled) = value_u64(key, "f").and_then(unix_seconds) {
        emit(sink, compiled, source, "Compilation time", &desc)?;
    }
    Ok(())
}

fn parse_programs_entry(
    key: &CellKeyNode,
    source: &str,
    sink: &mut EventSink<'_>,
) -> Result<(), PluginError> {
    let mut desc = vec![format!("KeyPath: {}", key.path)];
    if let Some(name) = value_string(key, "0") {
        desc.push(format!("Name: {name}"));
    }
    if let Some(version) = value_string(key, "1") {
        desc.push(format!("Version: {version}"));
    }
    if let Some(publisher) = value_string(key, "2") {
        desc.push(format!("Publisher: {publisher}"));
    }
    let desc = desc.join(" - ");

    emit(sink, key_written(key), source, "Key last modified timestamp", &desc)?;
    if let Some(installed) = value_u64(key, "a").and_then(unix_seconds) {
        emit(sink, installed, source, "Installation time", &desc)?;
    }
    if let Some(uninstalled) = value_u64(key, "b").filter(|v| *v != 0).and_then(unix_seconds) {
        emit(sink, uninstalled, source, "Uninstallation time", &desc)?;
    }
    Ok(())
}

fn emit(
    sink: &mut EventSink<'_>,
    timestamp: DateTime<Utc>,
    source: &str,
    label: &str,
    desc: &str,
) -> Result<(), PluginError> {
    let mut event = Event::at(timestamp);
    event.description = format!("{label} - {desc}");
    event.source = source.to_string();
    sink.emit(event)
}

fn key_written(key: &CellKeyNode) -> DateTime<Utc> {
    key.last_key_written_date_and_time()
}

fn key_name(key: &CellKeyNode) -> &str {
    key.path.rsplit('\\').next().unwrap_or("")
}

fn find_value(key: &CellKeyNode, name: &str) -> Option<CellValue> {
    key.value_iter()
        .find(|value| value.get_pretty_name().eq_ignore_ascii_case(name))
        .map(|value| value.get_content().0)
}

fn value_string(key: &CellKeyNode, name: &str) -> Option<String> {
    find_value(key, name).map(|content| readable_value(&content))
}

fn value_u64(key: &CellKeyNode, name: &str) -> Option<u64> {
    match find_value(key, name)? {
        CellValue::U32(v) => Some(u64::from(v)),
        CellValue::U64(v) => Some(v),
        CellValue::I32(v) => u64::try_from(v).ok(),
        CellValue::I64(v) => u64::try_from(v).ok(),
        CellValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// `FileId`/`DriverId` values prefix the sha1 digest with four filler
/// characters.
fn strip_sha1(value: &str) -> Option<String> {
    value
        .get(4..)
        .filter(|digest| !digest.is_empty())
        .map(str::to_string)
}

fn parse_link_date(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), LINK_DATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

fn unix_seconds(value: u64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(i64::try_from(value).ok()?, 0)
}
