//! `process_dir` command: every host found under an input tree.

use std::path::{Path, PathBuf};

use orc2timeline_core::orc::discover_host_jobs;
use orc2timeline_core::orchestrator::{run_host_jobs, HostFailure, RunOptions};
use orc2timeline_core::{CancelFlag, Config};

use crate::error::CliError;

pub async fn execute(
    config: &Config,
    input_dir: &Path,
    output_dir: &Path,
    jobs: usize,
    overwrite: bool,
    tmp_dir: Option<PathBuf>,
    cancel: CancelFlag,
) -> Result<(), CliError> {
    if !input_dir.is_dir() {
        return Err(CliError::Usage(format!(
            "'INPUT_DIR': Directory '{}' does not exist or is a file",
            input_dir.display()
        )));
    }
    if !output_dir.is_dir() {
        return Err(CliError::Usage(format!(
            "'OUTPUT_DIR': Directory '{}' does not exist or is a file",
            output_dir.display()
        )));
    }

    let host_jobs = discover_host_jobs(input_dir, output_dir)?;
    if host_jobs.is_empty() {
        tracing::warn!(
            input = %input_dir.display(),
            "no ORC archive found under input directory"
        );
        return Ok(());
    }

    let options = RunOptions {
        jobs,
        overwrite,
        tmp_dir,
        cancel,
    };
    let report = run_host_jobs(config, host_jobs, &options).await?;

    if report.all_hosts_succeeded() {
        return Ok(());
    }
    if let Some(path) = report.hosts.iter().find_map(|h| match &h.result {
        Err(HostFailure::OutputExists(path)) => Some(path.display().to_string()),
        _ => None,
    }) {
        return Err(CliError::OutputExists(path));
    }
    let failed = report.hosts.iter().filter(|h| h.result.is_err()).count();
    Err(CliError::Processing {
        failed,
        total: report.hosts.len(),
    })
}
