//! `process` command: one host, explicit file list.

use std::path::{Path, PathBuf};

use orc2timeline_core::orc::{bundle_for_single_host, HostJob, RESULT_EXTENSION};
use orc2timeline_core::orchestrator::{run_host_jobs, HostFailure, RunOptions};
use orc2timeline_core::{CancelFlag, Config};

use crate::error::CliError;

#[allow(clippy::too_many_arguments)]
pub async fn execute(
    config: &Config,
    files: &[PathBuf],
    output_path: &Path,
    jobs: usize,
    overwrite: bool,
    tmp_dir: Option<PathBuf>,
    cancel: CancelFlag,
) -> Result<(), CliError> {
    let output_name = output_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if !output_name.ends_with(RESULT_EXTENSION) {
        return Err(CliError::Usage(format!(
            "'OUTPUT_PATH': '{output_name}' must end with '{RESULT_EXTENSION}'"
        )));
    }
    let parent = output_path.parent().unwrap_or_else(|| Path::new("."));
    if !parent.as_os_str().is_empty() && !parent.is_dir() {
        return Err(CliError::Usage(format!(
            "'OUTPUT_PATH': Directory '{}' does not exist or is not a directory",
            parent.display()
        )));
    }
    if output_path.exists() && !overwrite {
        return Err(CliError::OutputExists(output_path.display().to_string()));
    }
    for file in files {
        if !file.is_file() {
            return Err(CliError::Usage(format!(
                "'FILE': '{}' does not exist or is not a file",
                file.display()
            )));
        }
    }

    let bundle = bundle_for_single_host(files)?;
    let job = HostJob {
        bundle,
        output_path: output_path.to_path_buf(),
    };

    let options = RunOptions {
        jobs,
        overwrite,
        tmp_dir,
        cancel,
    };
    let report = run_host_jobs(config, vec![job], &options).await?;

    match report.hosts.first().map(|h| &h.result) {
        Some(Ok(_)) => Ok(()),
        Some(Err(HostFailure::OutputExists(path))) => {
            Err(CliError::OutputExists(path.display().to_string()))
        }
        _ => Err(CliError::Processing {
            failed: 1,
            total: 1,
        }),
    }
}
