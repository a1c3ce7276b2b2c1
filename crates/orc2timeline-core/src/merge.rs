//! Final per-host merge: partial timelines in, one gzip CSV out.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::cancel::CancelFlag;
use crate::errors::MergeError;
use crate::sorter::merge_sorted_files;

/// Merge every partial timeline of one host into the final gzip-compressed
/// timeline at `output_path`, dropping byte-identical adjacent records.
///
/// The result is streamed into a `.tmp` sibling, fsynced and renamed into
/// place, so an interrupted run never leaves a truncated file at the target
/// path. Consumed partial timelines are deleted on success. Returns the
/// number of unique events written.
///
/// # Errors
///
/// Fails with `OutputExists` when the target is present and `overwrite` is
/// not set, and with an I/O error on any write failure.
pub fn write_host_timeline(
    partials: &[PathBuf],
    output_path: &Path,
    scratch: &Path,
    overwrite: bool,
    cancel: &CancelFlag,
) -> Result<u64, MergeError> {
    if cancel.is_cancelled() {
        return Err(MergeError::Cancelled);
    }
    if output_path.exists() && !overwrite {
        return Err(MergeError::OutputExists(output_path.to_path_buf()));
    }
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = tmp_sibling(output_path);
    let file = File::create(&tmp_path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut writer = BufWriter::new(encoder);

    let count = merge_sorted_files(partials, &mut writer, scratch)?;

    let encoder = writer.into_inner().map_err(|e| MergeError::Io(e.into_error()))?;
    let file = encoder.finish()?;
    file.sync_all()?;
    std::fs::rename(&tmp_path, output_path)?;

    for partial in partials {
        let _ = std::fs::remove_file(partial);
    }
    Ok(count)
}

fn tmp_sibling(output_path: &Path) -> PathBuf {
    let mut name = output_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".tmp");
    output_path.with_file_name(name)
}
