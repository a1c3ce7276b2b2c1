//! Configuration data model.

use regex::Regex;
use serde::Deserialize;

/// Default in-memory chunk size of the external sorter, in events.
pub const DEFAULT_CHUNK_SIZE: usize = 500_000;

/// One expanded plugin specification: a single (archive, sub-archive)
/// combination for one plugin. The YAML document lists archives and
/// sub-archives as sets; expansion happens at parse time so the scheduler only
/// ever sees concrete combinations.
#[derive(Debug, Clone)]
pub struct PluginSpec {
    /// Registered plugin name, e.g. `EventLogsToTimeline`.
    pub name: String,
    /// Archive-type token matched against outer archive file names.
    pub archive: String,
    /// Inner 7z holding the artefacts; `None` means the artefacts sit in the
    /// outer archive directly.
    pub sub_archive: Option<String>,
    /// Pattern applied to inner member names.
    pub match_pattern: Regex,
    /// Value of the SourceType column for every event this spec yields.
    pub source_type: String,
}

impl PluginSpec {
    /// The (plugin, archive, sub-archive) identity used to de-duplicate
    /// expanded specs.
    pub fn triple(&self) -> (String, String, Option<String>) {
        (
            self.name.clone(),
            self.archive.clone(),
            self.sub_archive.clone(),
        )
    }
}

// --- raw serde shapes -------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct RawConfig {
    #[serde(rename = "Plugins")]
    pub plugins: Vec<std::collections::BTreeMap<String, RawPluginEntry>>,
    #[serde(rename = "Options", default)]
    pub options: Option<RawOptions>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawPluginEntry {
    #[serde(default)]
    pub archives: Option<Vec<String>>,
    #[serde(default)]
    pub sub_archives: Option<Vec<String>>,
    #[serde(default)]
    pub match_pattern: String,
    #[serde(default)]
    pub source_type: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawOptions {
    #[serde(default)]
    pub chunk_size: Option<usize>,
}
