//! Two-phase scheduler.
//!
//! Phase 1 runs every plugin instance for every host; phase 2 merges each
//! host's partial timelines into its final gzip CSV. Both phases draw permits
//! from one semaphore sized by the user's worker count, tasks run on the
//! blocking pool, and a failure in one task never cancels its peers: it is
//! recorded in the run report and the remaining work continues.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cancel::CancelFlag;
use crate::config::Config;
use crate::errors::MergeError;
use crate::merge;
use crate::orc::{plan_instances, HostJob};
use crate::plugin::{run_instance, InstanceContext, InstanceReport};

const SCRATCH_PREFIX: &str = "Orc2TimelineTempDir_";

/// Scheduler knobs shared by `process` and `process_dir`.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum number of concurrently running tasks, phase 1 and phase 2
    /// alike.
    pub jobs: usize,
    pub overwrite: bool,
    /// Parent directory for the run's scratch tree; falls back to `TMPDIR`,
    /// then the system default.
    pub tmp_dir: Option<PathBuf>,
    pub cancel: CancelFlag,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            overwrite: false,
            tmp_dir: None,
            cancel: CancelFlag::new(),
        }
    }
}

/// Why a host produced no final timeline.
#[derive(Debug)]
pub enum HostFailure {
    OutputExists(PathBuf),
    Merge(String),
    Cancelled,
}

/// Per-host outcome: either the number of unique events written, or the
/// failure that stopped the host.
#[derive(Debug)]
pub struct HostOutcome {
    pub hostname: String,
    pub output_path: PathBuf,
    pub result: Result<u64, HostFailure>,
    pub instances: Vec<InstanceReport>,
}

/// Aggregated outcome of one run across all hosts.
#[derive(Debug, Default)]
pub struct RunReport {
    pub hosts: Vec<HostOutcome>,
}

impl RunReport {
    pub fn all_hosts_succeeded(&self) -> bool {
        self.hosts.iter().all(|h| h.result.is_ok())
    }

    pub fn any_output_exists(&self) -> bool {
        self.hosts
            .iter()
            .any(|h| matches!(h.result, Err(HostFailure::OutputExists(_))))
    }

    pub fn total_events(&self) -> u64 {
        self.hosts
            .iter()
            .filter_map(|h| h.result.as_ref().ok())
            .sum()
    }
}

/// Run the full pipeline for a set of host jobs.
///
/// # Errors
///
/// Returns an error only for run-level infrastructure problems (scratch
/// directory creation, a panicked worker). Host-level failures are reported
/// in the returned [`RunReport`].
pub async fn run_host_jobs(
    config: &Config,
    host_jobs: Vec<HostJob>,
    options: &RunOptions,
) -> Result<RunReport> {
    let scratch_parent = scratch_parent_dir(options);
    std::fs::create_dir_all(&scratch_parent)
        .with_context(|| format!("cannot use temporary directory {}", scratch_parent.display()))?;
    // Dropped on return, which removes the whole scratch tree even when a
    // host failed or the run was interrupted.
    let scratch_root = tempfile::Builder::new()
        .prefix(SCRATCH_PREFIX)
        .tempdir_in(&scratch_parent)
        .context("cannot create scratch directory")?;

    print_intro(&host_jobs);

    // One mutex per plugin family whose parser is single-threaded, shared
    // across that family's instances for the whole run.
    let parser_locks: HashMap<String, Arc<Mutex<()>>> = config
        .specs()
        .iter()
        .filter(|spec| {
            crate::plugin::registry::lookup(&spec.name)
                .is_some_and(|registration| registration.needs_parser_lock)
        })
        .map(|spec| (spec.name.clone(), Arc::new(Mutex::new(()))))
        .collect();

    let semaphore = Arc::new(Semaphore::new(options.jobs.max(1)));

    // --- phase 1: plugin instances -----------------------------------------
    let mut join_set: JoinSet<(usize, InstanceReport)> = JoinSet::new();
    let mut partials_per_host: Vec<Vec<PathBuf>> = vec![Vec::new(); host_jobs.len()];
    let mut skipped_hosts: Vec<Option<HostFailure>> = Vec::new();

    for (host_index, job) in host_jobs.iter().enumerate() {
        if job.output_path.exists() && !options.overwrite {
            tracing::warn!(
                host = job.bundle.hostname,
                output = %job.output_path.display(),
                "output file already exists, processing will be ignored for this host; \
                 use '--overwrite' if you know what you are doing"
            );
            skipped_hosts.push(Some(HostFailure::OutputExists(job.output_path.clone())));
            continue;
        }
        skipped_hosts.push(None);

        let host_scratch = scratch_root.path().join(format!("host_{host_index}"));
        let plans = plan_instances(&job.bundle, config.specs());
        tracing::info!(
            host = job.bundle.hostname,
            instances = plans.len(),
            jobs = options.jobs,
            "processing files for host"
        );

        for (instance_index, plan) in plans.into_iter().enumerate() {
            let instance_scratch = host_scratch.join(format!(
                "orc2timeline_{}_{instance_index}",
                plan.spec.name
            ));
            let partial_path = host_scratch.join(format!(
                "timeline_{}_{}_{instance_index}",
                job.bundle.hostname, plan.spec.name
            ));
            partials_per_host[host_index].push(partial_path.clone());

            let ctx = InstanceContext {
                parser_lock: parser_locks.get(&plan.spec.name).cloned(),
                plan,
                scratch_dir: instance_scratch,
                partial_timeline_path: partial_path,
                chunk_size: config.chunk_size(),
                aux_dir: config.aux_dir(),
                cancel: options.cancel.clone(),
            };

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .context("worker semaphore closed")?;
            join_set.spawn_blocking(move || {
                let report = run_instance(&ctx);
                drop(permit);
                (host_index, report)
            });
        }
    }

    let mut instances_per_host: Vec<Vec<InstanceReport>> =
        (0..host_jobs.len()).map(|_| Vec::new()).collect();
    while let Some(joined) = join_set.join_next().await {
        let (host_index, report) = joined.context("plugin instance task panicked")?;
        instances_per_host[host_index].push(report);
    }

    // --- phase 2: per-host merges ------------------------------------------
    let mut merge_set: JoinSet<(usize, Result<u64, MergeError>)> = JoinSet::new();
    for (host_index, job) in host_jobs.iter().enumerate() {
        if skipped_hosts[host_index].is_some() {
            continue;
        }
        tracing::info!(
            host = job.bundle.hostname,
            "merging all timelines generated per artefact"
        );
        let partials = std::mem::take(&mut partials_per_host[host_index]);
        let existing: Vec<PathBuf> = partials.into_iter().filter(|p| p.exists()).collect();
        let output_path = job.output_path.clone();
        let merge_scratch = scratch_root.path().join(format!("merge_{host_index}"));
        let overwrite = options.overwrite;
        let cancel = options.cancel.clone();

        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .context("worker semaphore closed")?;
        merge_set.spawn_blocking(move || {
            let _ = std::fs::create_dir_all(&merge_scratch);
            let result =
                merge::write_host_timeline(&existing, &output_path, &merge_scratch, overwrite, &cancel);
            drop(permit);
            (host_index, result)
        });
    }

    let mut merge_results: HashMap<usize, Result<u64, MergeError>> = HashMap::new();
    while let Some(joined) = merge_set.join_next().await {
        let (host_index, result) = joined.context("merge task panicked")?;
        merge_results.insert(host_index, result);
    }

    // --- report -------------------------------------------------------------
    let mut report = RunReport::default();
    for (host_index, job) in host_jobs.into_iter().enumerate() {
        let instances = std::mem::take(&mut instances_per_host[host_index]);
        let result = if let Some(failure) = skipped_hosts[host_index].take() {
            Err(failure)
        } else {
            match merge_results.remove(&host_index) {
                Some(Ok(events)) => Ok(events),
                Some(Err(MergeError::OutputExists(path))) => Err(HostFailure::OutputExists(path)),
                Some(Err(MergeError::Cancelled)) => Err(HostFailure::Cancelled),
                Some(Err(other)) => Err(HostFailure::Merge(other.to_string())),
                None => Err(HostFailure::Merge("merge task missing".to_string())),
            }
        };
        report.hosts.push(HostOutcome {
            hostname: job.bundle.hostname,
            output_path: job.output_path,
            result,
            instances,
        });
    }

    print_summaries(&report);
    Ok(report)
}

fn scratch_parent_dir(options: &RunOptions) -> PathBuf {
    if let Some(dir) = &options.tmp_dir {
        return dir.clone();
    }
    if let Some(dir) = std::env::var_os("TMPDIR") {
        return PathBuf::from(dir);
    }
    std::env::temp_dir()
}

fn print_intro(host_jobs: &[HostJob]) {
    for job in host_jobs {
        let files: Vec<String> = job
            .bundle
            .members
            .iter()
            .map(|(_, path)| path.display().to_string())
            .collect();
        tracing::info!("==============================================");
        tracing::info!(host = job.bundle.hostname, "Host");
        tracing::info!(files = %files.join(", "), "Files used");
        tracing::info!(result = %job.output_path.display(), "Result file");
    }
}

fn print_summaries(report: &RunReport) {
    tracing::info!("== Printing final summary of generated timelines:");
    for host in &report.hosts {
        tracing::info!("=======================================================================");
        match &host.result {
            Ok(events) => {
                tracing::info!(host = host.hostname, events, "host timeline written");
                let mut per_plugin: Vec<(&str, u64)> = Vec::new();
                for instance in &host.instances {
                    match per_plugin.iter_mut().find(|(name, _)| *name == instance.plugin) {
                        Some((_, sum)) => *sum += instance.events_written,
                        None => per_plugin.push((&instance.plugin, instance.events_written)),
                    }
                }
                per_plugin.sort_unstable();
                for (plugin, events) in per_plugin {
                    tracing::info!(host = host.hostname, plugin, events, "plugin summary");
                }
                let skipped_files: u64 = host.instances.iter().map(|i| i.files_skipped).sum();
                if skipped_files > 0 {
                    tracing::warn!(host = host.hostname, skipped_files, "files skipped");
                }
                let failed_instances =
                    host.instances.iter().filter(|i| i.failure.is_some()).count();
                if failed_instances > 0 {
                    tracing::warn!(
                        host = host.hostname,
                        failed_instances,
                        "plugin instances failed, their events are missing from the timeline"
                    );
                }
            }
            Err(HostFailure::OutputExists(path)) => {
                tracing::warn!(
                    host = host.hostname,
                    output = %path.display(),
                    "host skipped, output already exists"
                );
            }
            Err(HostFailure::Cancelled) => {
                tracing::warn!(host = host.hostname, "host interrupted");
            }
            Err(HostFailure::Merge(message)) => {
                tracing::error!(host = host.hostname, error = %message, "host merge failed");
            }
        }
    }
    tracing::info!(total = report.total_events(), "events processed");
    tracing::info!("=======================================================================");
}
