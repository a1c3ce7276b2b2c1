//! DFIR-ORC collection resolution: file-name parsing, host grouping, and the
//! spec-to-instance cross join.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use walkdir::WalkDir;

use crate::config::PluginSpec;
use crate::errors::InputError;

/// Outer archive naming convention: `[DFIR-]ORC_<role>_<hostname>_<type>.7z`.
/// The hostname capture is greedy, so underscores inside host names survive;
/// the archive type is everything after the last underscore.
static ORC_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:DFIR-)?ORC_[^_]*_(.*)_([^_]*)\.7z$").expect("valid ORC name regex")
});

pub const RESULT_EXTENSION: &str = ".csv.gz";

/// Hostname and archive-type token decoded from one outer archive name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrcFileName {
    pub hostname: String,
    pub archive_type: String,
}

/// Decode an outer archive file name.
pub fn parse_orc_file_name(path: &Path) -> Result<OrcFileName, InputError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| InputError::UnparseableName(path.to_path_buf()))?;
    let caps = ORC_NAME_RE
        .captures(name)
        .ok_or_else(|| InputError::UnparseableName(path.to_path_buf()))?;
    let hostname = caps[1].to_string();
    if hostname.is_empty() {
        return Err(InputError::UnparseableName(path.to_path_buf()));
    }
    Ok(OrcFileName {
        hostname,
        archive_type: caps[2].to_string(),
    })
}

/// All outer archives collected for one host.
#[derive(Debug, Clone)]
pub struct HostBundle {
    pub hostname: String,
    /// Outer archive paths with their decoded archive types, in input order.
    pub members: Vec<(String, PathBuf)>,
}

impl HostBundle {
    /// Outer archives whose type token contains `archive`, mirroring the
    /// substring match the collector uses for profile variants
    /// (e.g. `Little` also selects `General_Little`).
    pub fn members_matching<'a>(
        &'a self,
        archive: &'a str,
    ) -> impl Iterator<Item = &'a PathBuf> + 'a {
        self.members
            .iter()
            .filter(move |(ty, _)| ty.contains(archive))
            .map(|(_, path)| path)
    }
}

/// Group an explicit file list intended for a single host.
///
/// # Errors
///
/// Fails fast with `InputError` when any name does not follow the ORC
/// convention, or when the list spans more than one hostname.
pub fn bundle_for_single_host(files: &[PathBuf]) -> Result<HostBundle, InputError> {
    let mut members = Vec::new();
    let mut hosts: Vec<String> = Vec::new();
    for file in files {
        let decoded = parse_orc_file_name(file)?;
        if !hosts.contains(&decoded.hostname) {
            hosts.push(decoded.hostname.clone());
        }
        members.push((decoded.archive_type, file.clone()));
    }
    hosts.sort();
    match hosts.len() {
        0 => Err(InputError::Invalid("empty file list".to_string())),
        1 => Ok(HostBundle {
            hostname: hosts.remove(0),
            members,
        }),
        _ => Err(InputError::MixedHosts {
            hosts: hosts.join(", "),
        }),
    }
}

/// One host's worth of work: its bundle and where the final timeline goes.
#[derive(Debug, Clone)]
pub struct HostJob {
    pub bundle: HostBundle,
    pub output_path: PathBuf,
}

/// Recursively crawl `input_dir` for `*.7z` collections, group them by
/// hostname, and derive one job per host with the output placed under
/// `output_dir` mirroring the input's relative subtree.
///
/// Files that do not follow the ORC naming convention are ignored with a log
/// line, matching collector droppings like `config.xml` living next to the
/// archives.
///
/// # Errors
///
/// Fails when the same hostname appears under two different subtrees: the two
/// jobs would race on one output file.
pub fn discover_host_jobs(input_dir: &Path, output_dir: &Path) -> Result<Vec<HostJob>, InputError> {
    // BTreeMap keyed by output path keeps job order stable across runs.
    let mut jobs: BTreeMap<PathBuf, HostBundle> = BTreeMap::new();

    for entry in WalkDir::new(input_dir).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Ok(decoded) = parse_orc_file_name(path) else {
            if path.extension().is_some_and(|e| e == "7z") {
                tracing::info!(
                    file = %path.display(),
                    "impossible to extract hostname from filename, file will be ignored"
                );
            }
            continue;
        };
        let rel_dir = path
            .parent()
            .and_then(|p| p.strip_prefix(input_dir).ok())
            .unwrap_or_else(|| Path::new(""));
        let output_path = output_dir
            .join(rel_dir)
            .join(format!("{}{RESULT_EXTENSION}", decoded.hostname));
        jobs.entry(output_path)
            .or_insert_with(|| HostBundle {
                hostname: decoded.hostname.clone(),
                members: Vec::new(),
            })
            .members
            .push((decoded.archive_type, path.to_path_buf()));
    }

    let mut seen_hosts: Vec<&str> = Vec::new();
    let mut dupes: Vec<&str> = Vec::new();
    for bundle in jobs.values() {
        if seen_hosts.contains(&bundle.hostname.as_str()) {
            dupes.push(&bundle.hostname);
        } else {
            seen_hosts.push(&bundle.hostname);
        }
    }
    if !dupes.is_empty() {
        dupes.sort_unstable();
        dupes.dedup();
        return Err(InputError::DuplicateHosts {
            hosts: dupes.join(", "),
        });
    }

    Ok(jobs
        .into_iter()
        .map(|(output_path, bundle)| HostJob {
            bundle,
            output_path,
        })
        .collect())
}

/// A concrete unit of phase-1 work: one plugin spec against one outer archive.
#[derive(Debug, Clone)]
pub struct InstancePlan {
    pub spec: PluginSpec,
    pub hostname: String,
    pub outer_path: PathBuf,
}

/// Cross a host bundle with the spec table. Specs whose archive type is
/// absent from the bundle contribute nothing; an ORC collection need not
/// contain every archive type.
pub fn plan_instances(bundle: &HostBundle, specs: &[PluginSpec]) -> Vec<InstancePlan> {
    let mut plans = Vec::new();
    for spec in specs {
        for outer in bundle.members_matching(&spec.archive) {
            plans.push(InstancePlan {
                spec: spec.clone(),
                hostname: bundle.hostname.clone(),
                outer_path: outer.clone(),
            });
        }
    }
    plans
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn parses_plain_orc_name() {
        let decoded = parse_orc_file_name(Path::new("ORC_Server_FAKEMACHINE_General.7z")).unwrap();
        assert_eq!(decoded.hostname, "FAKEMACHINE");
        assert_eq!(decoded.archive_type, "General");
    }

    #[test]
    fn parses_dfir_prefixed_name_with_dotted_host() {
        let decoded = parse_orc_file_name(Path::new("DFIR-ORC_S_A.dom_Little.7z")).unwrap();
        assert_eq!(decoded.hostname, "A.dom");
        assert_eq!(decoded.archive_type, "Little");
    }

    #[test]
    fn hostname_keeps_inner_underscores() {
        let decoded =
            parse_orc_file_name(Path::new("DFIR-ORC_WS_SRV_01_FINANCE_Detail.7z")).unwrap();
        assert_eq!(decoded.hostname, "SRV_01_FINANCE");
        assert_eq!(decoded.archive_type, "Detail");
    }

    #[test]
    fn rejects_non_orc_name() {
        assert!(parse_orc_file_name(Path::new("random.7z")).is_err());
        assert!(parse_orc_file_name(Path::new("ORC_Server_HOST_General.zip")).is_err());
    }

    #[test]
    fn single_host_bundle_groups_members() {
        let files = vec![
            PathBuf::from("DFIR-ORC_S_A.dom_General.7z"),
            PathBuf::from("DFIR-ORC_S_A.dom_Little.7z"),
        ];
        let bundle = bundle_for_single_host(&files).unwrap();
        assert_eq!(bundle.hostname, "A.dom");
        assert_eq!(bundle.members.len(), 2);
    }

    #[test]
    fn mixed_hosts_fail_with_both_names() {
        let files = vec![
            PathBuf::from("DFIR-ORC_S_A.dom_General.7z"),
            PathBuf::from("DFIR-ORC_S_B.dom_Offline.7z"),
        ];
        let err = bundle_for_single_host(&files).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("A.dom"));
        assert!(msg.contains("B.dom"));
    }

    #[test]
    fn unparseable_name_fails_fast() {
        let files = vec![
            PathBuf::from("DFIR-ORC_S_A.dom_General.7z"),
            PathBuf::from("notes.txt"),
        ];
        assert!(matches!(
            bundle_for_single_host(&files),
            Err(InputError::UnparseableName(_))
        ));
    }

    #[test]
    fn plan_skips_missing_archive_types() {
        let bundle = HostBundle {
            hostname: "A".to_string(),
            members: vec![("General".to_string(), PathBuf::from("a.7z"))],
        };
        let specs = vec![
            PluginSpec {
                name: "USNInfoToTimeline".to_string(),
                archive: "General".to_string(),
                sub_archive: None,
                match_pattern: Regex::new(".*").unwrap(),
                source_type: "USN journal".to_string(),
            },
            PluginSpec {
                name: "USNInfoToTimeline".to_string(),
                archive: "Offline".to_string(),
                sub_archive: None,
                match_pattern: Regex::new(".*").unwrap(),
                source_type: "USN journal".to_string(),
            },
        ];
        let plans = plan_instances(&bundle, &specs);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].spec.archive, "General");
    }
}
