//! Bundled artefact plugins.
//!
//! Each module converts one artefact class into timeline events. Plugins are
//! wired up by name in [`crate::plugin::registry`]; adding one means adding a
//! module here and a registration entry there.

pub mod amcache;
pub mod browsers_history;
pub mod event_logs;
pub mod firefox_history;
pub mod i30_info;
pub mod ntfs_info;
pub mod recycle_bin;
pub mod registry_hive;
pub mod userassist;
pub mod usn_info;

use std::path::Path;

/// Read a `#`-commented auxiliary text file, returning its non-empty lines.
/// A missing file yields an empty list: auxiliary data is always optional.
pub(crate) fn read_aux_lines(aux_dir: &Path, file_name: &str) -> Vec<String> {
    let path = aux_dir.join(file_name);
    let Ok(text) = std::fs::read_to_string(&path) else {
        return Vec::new();
    };
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Look up a CSV field by column name. DFIR-ORC tools occasionally reorder or
/// extend their columns, so positions are never hard-coded.
pub(crate) fn csv_field<'r>(
    record: &'r csv::StringRecord,
    headers: &csv::StringRecord,
    name: &str,
) -> Option<&'r str> {
    headers
        .iter()
        .position(|h| h == name)
        .and_then(|index| record.get(index))
}
