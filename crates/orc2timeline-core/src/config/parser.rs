//! YAML parsing and validation of the plugin table.

use std::collections::HashSet;
use std::path::Path;

use regex::Regex;

use crate::config::types::{PluginSpec, RawConfig, DEFAULT_CHUNK_SIZE};
use crate::errors::ConfigError;
use crate::plugin::registry;

/// Parse and validate a configuration document.
///
/// Each `Plugins` element is a single-key mapping from plugin name to its
/// parameters; the archive and sub-archive sets are expanded into the
/// cartesian product of concrete (archive, sub-archive) specs, and duplicate
/// triples across entries are dropped.
///
/// Validation checks every entry before failing, so one run reports every
/// problem in the document rather than the first one.
///
/// # Errors
///
/// Returns a `ConfigError` on YAML errors, or on unknown plugin names, empty
/// archive lists, empty `source_type`, a `match_pattern` that is empty or
/// does not compile, or a zero `chunk_size`.
pub fn parse_config(text: &str, path: &Path) -> Result<(Vec<PluginSpec>, usize), ConfigError> {
    let raw: RawConfig = serde_yaml::from_str(text).map_err(|source| ConfigError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;

    let mut problems: Vec<String> = Vec::new();

    let chunk_size = raw
        .options
        .as_ref()
        .and_then(|o| o.chunk_size)
        .unwrap_or(DEFAULT_CHUNK_SIZE);
    if chunk_size == 0 {
        problems.push("chunk_size must be at least 1".to_string());
    }

    let mut specs = Vec::new();
    let mut seen: HashSet<(String, String, Option<String>)> = HashSet::new();

    for entry in &raw.plugins {
        if entry.len() != 1 {
            problems.push(format!(
                "plugin entry must be a single-key mapping, found {} keys",
                entry.len()
            ));
            continue;
        }
        let (name, params) = entry.iter().next().expect("single-key mapping");

        let mut entry_valid = true;
        if registry::lookup(name).is_none() {
            problems.push(format!("plugin {name}: no such plugin is registered"));
            entry_valid = false;
        }
        let archives = params.archives.clone().unwrap_or_default();
        if archives.is_empty() {
            problems.push(format!(
                "plugin {name}: configuration describes plugin without any archive"
            ));
            entry_valid = false;
        }
        if params.source_type.is_empty() {
            problems.push(format!("plugin {name}: empty source_type is not allowed"));
            entry_valid = false;
        }
        let pattern = if params.match_pattern.is_empty() {
            problems.push(format!(
                "plugin {name}: empty match_pattern is not allowed (hint: \".*\" matches all files)"
            ));
            entry_valid = false;
            None
        } else {
            match Regex::new(&params.match_pattern) {
                Ok(pattern) => Some(pattern),
                Err(source) => {
                    problems.push(format!("plugin {name}: invalid match_pattern: {source}"));
                    entry_valid = false;
                    None
                }
            }
        };
        if !entry_valid {
            continue;
        }
        let pattern = pattern.expect("validated above");

        let sub_archives: Vec<Option<String>> = match params.sub_archives.as_deref() {
            None | Some([]) => vec![None],
            Some(subs) => subs.iter().cloned().map(Some).collect(),
        };

        for archive in &archives {
            for sub in &sub_archives {
                let spec = PluginSpec {
                    name: name.clone(),
                    archive: archive.clone(),
                    sub_archive: sub.clone(),
                    match_pattern: pattern.clone(),
                    source_type: params.source_type.clone(),
                };
                if seen.insert(spec.triple()) {
                    specs.push(spec);
                }
            }
        }
    }

    if !problems.is_empty() {
        return Err(ConfigError::Invalid {
            problems: problems.join("; "),
        });
    }
    if specs.is_empty() {
        return Err(ConfigError::NoPlugins);
    }

    Ok((specs, chunk_size))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<(Vec<PluginSpec>, usize), ConfigError> {
        parse_config(text, Path::new("Orc2Timeline.yaml"))
    }

    fn problems(result: Result<(Vec<PluginSpec>, usize), ConfigError>) -> String {
        match result {
            Err(ConfigError::Invalid { problems }) => problems,
            other => panic!("expected invalid-configuration error, got {other:?}"),
        }
    }

    #[test]
    fn expands_archives_and_sub_archives() {
        let yaml = r#"
Plugins:
  - EventLogsToTimeline:
      archives: ["General", "Little"]
      sub_archives: ["Event.7z", "Event_Little.7z"]
      match_pattern: ".*\\.evtx$"
      source_type: "EventLogs"
"#;
        let (specs, chunk) = parse(yaml).unwrap();
        assert_eq!(specs.len(), 4);
        assert_eq!(chunk, DEFAULT_CHUNK_SIZE);
        assert!(specs
            .iter()
            .any(|s| s.archive == "Little" && s.sub_archive.as_deref() == Some("Event.7z")));
    }

    #[test]
    fn missing_sub_archives_means_direct_extraction() {
        let yaml = r#"
Plugins:
  - NTFSInfoToTimeline:
      archives: ["General"]
      match_pattern: "NTFSInfo.*\\.csv$"
      source_type: "MFT"
"#;
        let (specs, _) = parse(yaml).unwrap();
        assert_eq!(specs.len(), 1);
        assert!(specs[0].sub_archive.is_none());
    }

    #[test]
    fn duplicate_triples_across_entries_are_dropped() {
        let yaml = r#"
Plugins:
  - NTFSInfoToTimeline:
      archives: ["General"]
      match_pattern: "NTFSInfo.*"
      source_type: "MFT"
  - NTFSInfoToTimeline:
      archives: ["General", "Little"]
      match_pattern: "NTFSInfo.*"
      source_type: "MFT"
"#;
        let (specs, _) = parse(yaml).unwrap();
        assert_eq!(specs.len(), 2);
    }

    #[test]
    fn empty_archives_is_an_error() {
        let yaml = r#"
Plugins:
  - NTFSInfoToTimeline:
      archives: []
      match_pattern: ".*"
      source_type: "MFT"
"#;
        assert!(problems(parse(yaml)).contains("without any archive"));
    }

    #[test]
    fn empty_match_pattern_is_an_error() {
        let yaml = r#"
Plugins:
  - NTFSInfoToTimeline:
      archives: ["General"]
      match_pattern: ""
      source_type: "MFT"
"#;
        assert!(problems(parse(yaml)).contains("empty match_pattern"));
    }

    #[test]
    fn bad_regex_is_an_error() {
        let yaml = r#"
Plugins:
  - NTFSInfoToTimeline:
      archives: ["General"]
      match_pattern: "(["
      source_type: "MFT"
"#;
        assert!(problems(parse(yaml)).contains("invalid match_pattern"));
    }

    #[test]
    fn unknown_plugin_is_an_error() {
        let yaml = r#"
Plugins:
  - NoSuchPlugin:
      archives: ["General"]
      match_pattern: ".*"
      source_type: "X"
"#;
        assert!(problems(parse(yaml)).contains("no such plugin"));
    }

    #[test]
    fn all_entry_problems_are_reported_in_one_pass() {
        let yaml = r#"
Plugins:
  - NoSuchPlugin:
      archives: ["General"]
      match_pattern: ".*"
      source_type: "X"
  - NTFSInfoToTimeline:
      archives: []
      match_pattern: "(["
      source_type: ""
  - USNInfoToTimeline:
      archives: ["General"]
      match_pattern: "USNInfo.*"
      source_type: "USN journal"
"#;
        let joined = problems(parse(yaml));
        assert!(joined.contains("NoSuchPlugin: no such plugin"));
        assert!(joined.contains("NTFSInfoToTimeline: configuration describes plugin without any archive"));
        assert!(joined.contains("NTFSInfoToTimeline: empty source_type"));
        assert!(joined.contains("NTFSInfoToTimeline: invalid match_pattern"));
    }

    #[test]
    fn broken_yaml_is_an_error() {
        let yaml = "Plugins:\n  - X:\n  archives: [\"A\"]\n      nope";
        assert!(matches!(parse(yaml), Err(ConfigError::Yaml { .. })));
    }

    #[test]
    fn chunk_size_option_is_honoured() {
        let yaml = r#"
Plugins:
  - USNInfoToTimeline:
      archives: ["General"]
      match_pattern: "USNInfo.*"
      source_type: "USN journal"
Options:
  chunk_size: 3
"#;
        let (_, chunk) = parse(yaml).unwrap();
        assert_eq!(chunk, 3);
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let yaml = r#"
Plugins:
  - USNInfoToTimeline:
      archives: ["General"]
      match_pattern: "USNInfo.*"
      source_type: "USN journal"
Options:
  chunk_size: 0
"#;
        assert!(problems(parse(yaml)).contains("chunk_size"));
    }
}
