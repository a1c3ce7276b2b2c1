//! Selective extraction from nested 7z containers.
//!
//! Outer archives are enumerated without inflating them; only members whose
//! inner path matches the plugin's pattern are materialised into the instance
//! scratch directory. When a sub-archive name is configured, matching inner
//! 7z files are staged first and the pattern runs against their members
//! instead. A `GetThis.csv` sidecar, when present, maps extracted sample
//! names back to their original Windows paths.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Read};
use std::path::{Path, PathBuf};

use regex::Regex;
use sevenz_rust::{Password, SevenZReader};

use crate::cancel::CancelFlag;
use crate::errors::ExtractError;

const GETTHIS_FILE_NAME: &str = "GetThis.csv";

/// One materialised artefact.
#[derive(Debug, Clone)]
pub struct Artefact {
    /// On-disk location inside the instance scratch directory.
    pub path: PathBuf,
    /// Path of the member inside the archive it came from.
    pub member_path: String,
    /// Original Windows path recovered from the GetThis.csv sidecar.
    pub original_path: Option<String>,
}

impl Artefact {
    /// Best available source identifier: the original Windows path when the
    /// sidecar named one, the in-archive path otherwise.
    pub fn source_hint(&self) -> &str {
        self.original_path.as_deref().unwrap_or(&self.member_path)
    }

    /// Base name of the materialised file.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Outcome of extraction for one plugin instance.
#[derive(Debug, Default)]
pub struct ExtractionReport {
    pub artefacts: Vec<Artefact>,
    /// Sub-archives that could not be opened (corrupt or truncated).
    pub skipped_archives: u64,
}

/// Materialise every artefact the given spec selects out of one outer
/// archive.
///
/// # Errors
///
/// Fails on an unreadable outer archive, scratch-directory I/O errors, or
/// cancellation. Corrupt inner sub-archives are logged, counted and skipped.
pub fn extract_for_instance(
    outer: &Path,
    sub_archive: Option<&str>,
    pattern: &Regex,
    scratch: &Path,
    cancel: &CancelFlag,
) -> Result<ExtractionReport, ExtractError> {
    let mut extractor = Extractor::new(scratch);

    match sub_archive {
        None => extractor.extract_matching(outer, pattern, cancel)?,
        Some(sub) => {
            let staged = extractor.stage_sub_archives(outer, sub, cancel)?;
            for inner in &staged {
                if let Err(err) = extractor.extract_matching(inner, pattern, cancel) {
                    match err {
                        ExtractError::Cancelled => return Err(ExtractError::Cancelled),
                        other => {
                            tracing::warn!(
                                sub_archive = sub,
                                outer = %outer.display(),
                                error = %other,
                                "unable to deflate sub-archive, skipping"
                            );
                            extractor.skipped_archives += 1;
                            continue;
                        }
                    }
                }
                if let Err(err) = extractor.collect_original_paths(inner) {
                    tracing::debug!(error = %err, "no usable GetThis.csv in sub-archive");
                }
            }
            let _ = std::fs::remove_dir_all(extractor.staging_dir());
        }
    }

    Ok(extractor.into_report())
}

/// Drop extracted files whose first bytes do not match `header`, deleting
/// them from disk. Unreadable files are dropped as well.
pub fn retain_matching_header(
    artefacts: Vec<Artefact>,
    header: &[u8],
) -> io::Result<Vec<Artefact>> {
    if header.is_empty() {
        return Ok(artefacts);
    }
    let mut kept = Vec::with_capacity(artefacts.len());
    for artefact in artefacts {
        let mut prefix = vec![0u8; header.len()];
        let matches = File::open(&artefact.path)
            .and_then(|mut f| f.read_exact(&mut prefix))
            .is_ok()
            && prefix == header;
        if matches {
            kept.push(artefact);
        } else {
            tracing::debug!(file = %artefact.path.display(), "file header mismatch, discarding");
            let _ = std::fs::remove_file(&artefact.path);
        }
    }
    Ok(kept)
}

struct Extractor {
    scratch: PathBuf,
    counter: usize,
    artefacts: Vec<Artefact>,
    original_paths: HashMap<String, String>,
    skipped_archives: u64,
}

impl Extractor {
    fn new(scratch: &Path) -> Self {
        Self {
            scratch: scratch.to_path_buf(),
            counter: 0,
            artefacts: Vec::new(),
            original_paths: HashMap::new(),
            skipped_archives: 0,
        }
    }

    fn data_dir(&self) -> PathBuf {
        self.scratch.join("extracted")
    }

    fn staging_dir(&self) -> PathBuf {
        self.scratch.join("sub_archives")
    }

    fn into_report(self) -> ExtractionReport {
        let original_paths = self.original_paths;
        let artefacts = self
            .artefacts
            .into_iter()
            .map(|mut artefact| {
                let key = member_base_name(&artefact.member_path);
                artefact.original_path = original_paths.get(&key).cloned();
                artefact
            })
            .collect();
        ExtractionReport {
            artefacts,
            skipped_archives: self.skipped_archives,
        }
    }

    /// Extract every member of `archive` whose path matches `pattern` into
    /// the data directory.
    fn extract_matching(
        &mut self,
        archive: &Path,
        pattern: &Regex,
        cancel: &CancelFlag,
    ) -> Result<(), ExtractError> {
        let dir = self.data_dir();
        std::fs::create_dir_all(&dir)?;
        let extracted = self.visit_archive(archive, cancel, |name| pattern.is_match(name), &dir)?;
        self.artefacts.extend(extracted);
        Ok(())
    }

    /// Extract inner 7z members whose base name equals `sub_archive` into the
    /// staging directory, returning their on-disk paths.
    fn stage_sub_archives(
        &mut self,
        outer: &Path,
        sub_archive: &str,
        cancel: &CancelFlag,
    ) -> Result<Vec<PathBuf>, ExtractError> {
        let dir = self.staging_dir();
        std::fs::create_dir_all(&dir)?;
        let staged = self.visit_archive(outer, cancel, |name| {
            member_base_name(name) == sub_archive
        }, &dir)?;
        Ok(staged.into_iter().map(|a| a.path).collect())
    }

    /// Pull `GetThis.csv` out of a sub-archive and fold its sample-name to
    /// original-path mapping into the extractor, deleting the sidecar
    /// afterwards.
    fn collect_original_paths(&mut self, inner: &Path) -> Result<(), ExtractError> {
        let dir = self.staging_dir();
        let extracted = self.visit_archive(inner, &CancelFlag::new(), |name| {
            member_base_name(name) == GETTHIS_FILE_NAME
        }, &dir)?;
        for sidecar in extracted {
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_path(&sidecar.path)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            for record in reader.records() {
                let Ok(record) = record else { continue };
                let (Some(full_name), Some(sample_name)) = (record.get(4), record.get(5)) else {
                    continue;
                };
                let key = member_base_name(&sample_name.replace('\\', "/"));
                if !key.is_empty() {
                    self.original_paths.insert(key, full_name.to_string());
                }
            }
            let _ = std::fs::remove_file(&sidecar.path);
        }
        Ok(())
    }

    /// Walk one archive, writing every member accepted by `select` into
    /// `dir`. Zero-byte members and directories are skipped; duplicate base
    /// names get an extraction counter suffix; file names are sanitised for
    /// the local filesystem.
    fn visit_archive(
        &mut self,
        archive: &Path,
        cancel: &CancelFlag,
        select: impl Fn(&str) -> bool,
        dir: &Path,
    ) -> Result<Vec<Artefact>, ExtractError> {
        let mut reader =
            SevenZReader::open(archive, Password::empty()).map_err(|e| ExtractError::Archive {
                archive: archive.to_path_buf(),
                message: e.to_string(),
            })?;

        let mut extracted: Vec<Artefact> = Vec::new();
        let mut write_error: Option<io::Error> = None;
        let mut cancelled = false;
        let mut pending: Vec<(String, PathBuf)> = Vec::new();

        reader
            .for_each_entries(|entry, entry_reader| {
                if cancel.is_cancelled() {
                    cancelled = true;
                    return Ok(false);
                }
                if entry.is_directory() || entry.size() == 0 {
                    return Ok(true);
                }
                let member_path = entry.name().replace('\\', "/");
                if !select(&member_path) {
                    return Ok(true);
                }
                let target = self.unique_target(dir, &member_path);
                match write_member(entry_reader, &target) {
                    Ok(()) => {
                        pending.push((member_path, target));
                        Ok(true)
                    }
                    Err(e) => {
                        write_error = Some(e);
                        Ok(false)
                    }
                }
            })
            .map_err(|e| ExtractError::Archive {
                archive: archive.to_path_buf(),
                message: e.to_string(),
            })?;

        if cancelled {
            return Err(ExtractError::Cancelled);
        }
        if let Some(e) = write_error {
            return Err(e.into());
        }

        for (member_path, target) in pending {
            extracted.push(Artefact {
                path: target,
                member_path,
                original_path: None,
            });
        }
        Ok(extracted)
    }

    fn unique_target(&mut self, dir: &Path, member_path: &str) -> PathBuf {
        let base = sanitize_file_name(&member_base_name(member_path));
        let mut target = dir.join(&base);
        while target.exists() {
            self.counter += 1;
            target = dir.join(format!("{base}_{}", self.counter));
        }
        target
    }
}

fn write_member(reader: &mut dyn Read, target: &Path) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(target)?);
    io::copy(reader, &mut writer)?;
    Ok(())
}

fn member_base_name(member_path: &str) -> String {
    member_path
        .rsplit('/')
        .next()
        .unwrap_or(member_path)
        .to_string()
}

/// Replace path separators and characters the local filesystem rejects, and
/// keep names under the common 255-byte limit.
fn sanitize_file_name(name: &str) -> String {
    const MAX_FILE_NAME_LENGTH: usize = 200;
    let mut sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if sanitized.is_empty() {
        sanitized.push('_');
    }
    if sanitized.len() > MAX_FILE_NAME_LENGTH {
        let cut = sanitized.len() - MAX_FILE_NAME_LENGTH;
        let mut index = cut;
        while !sanitized.is_char_boundary(index) {
            index += 1;
        }
        sanitized = sanitized[index..].to_string();
    }
    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_name_handles_nested_and_flat_paths() {
        assert_eq!(member_base_name("a/b/c.evtx"), "c.evtx");
        assert_eq!(member_base_name("Event.7z"), "Event.7z");
    }

    #[test]
    fn sanitizes_forbidden_characters() {
        assert_eq!(sanitize_file_name("a:b*c?d"), "a_b_c_d");
        assert_eq!(sanitize_file_name("x<y>|z\""), "x_y___z_");
    }

    #[test]
    fn long_names_are_truncated_from_the_front() {
        let long = "a".repeat(300);
        let sanitized = sanitize_file_name(&long);
        assert_eq!(sanitized.len(), 200);
    }

    #[test]
    fn header_filter_keeps_matching_prefix_only() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good");
        let bad = dir.path().join("bad");
        std::fs::write(&good, b"regf-rest-of-hive").unwrap();
        std::fs::write(&bad, b"\x00egf-rest").unwrap();

        let artefacts = vec![
            Artefact {
                path: good.clone(),
                member_path: "good".to_string(),
                original_path: None,
            },
            Artefact {
                path: bad.clone(),
                member_path: "bad".to_string(),
                original_path: None,
            },
        ];
        let kept = retain_matching_header(artefacts, b"regf").unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].path, good);
        assert!(!bad.exists(), "mismatching file is deleted");
    }

    #[test]
    fn empty_header_keeps_everything() {
        let artefacts = vec![Artefact {
            path: PathBuf::from("/nonexistent"),
            member_path: "x".to_string(),
            original_path: None,
        }];
        let kept = retain_matching_header(artefacts, b"").unwrap();
        assert_eq!(kept.len(), 1);
    }
}
