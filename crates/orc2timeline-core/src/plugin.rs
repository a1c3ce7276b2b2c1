//! Plugin contract and runtime.
//!
//! Plugins never open archives: the runtime extracts matching artefacts,
//! applies the plugin's header filter, then calls `parse_artefact` exactly
//! once per surviving file. Events flow through the [`EventSink`], which
//! resolves timestamps, encodes CSV lines and feeds the instance's external
//! sorter. Plugins are registered by name in a static table; families whose
//! underlying parser is not thread-safe are flagged there and serialised by a
//! per-family mutex.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::cancel::CancelFlag;
use crate::errors::{ExtractError, PluginError};
use crate::event::Event;
use crate::extract::{self, Artefact};
use crate::orc::InstancePlan;
use crate::sorter::ExternalSorter;

/// Capability set every artefact parser implements.
pub trait TimelinePlugin: Send {
    /// First bytes an artefact must start with to be handed to this plugin.
    fn file_header(&self) -> Option<&[u8]> {
        None
    }

    /// Parse one extracted artefact, emitting events through the sink.
    fn parse_artefact(
        &mut self,
        artefact: &Artefact,
        sink: &mut EventSink<'_>,
    ) -> Result<(), PluginError>;

    /// Flush any per-instance buffered state.
    fn finalize(&mut self, _sink: &mut EventSink<'_>) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Runtime-provided emission context for one plugin instance.
pub struct EventSink<'a> {
    hostname: &'a str,
    source_type: &'a str,
    sorter: &'a mut ExternalSorter,
    dropped: u64,
}

impl<'a> EventSink<'a> {
    pub fn new(hostname: &'a str, source_type: &'a str, sorter: &'a mut ExternalSorter) -> Self {
        Self {
            hostname,
            source_type,
            sorter,
            dropped: 0,
        }
    }

    pub fn hostname(&self) -> &str {
        self.hostname
    }

    /// Emit one event. Events without a resolvable timestamp are discarded
    /// with a debug log.
    pub fn emit(&mut self, event: Event) -> Result<(), PluginError> {
        let Some(timestamp) = event.resolve_timestamp() else {
            self.dropped += 1;
            tracing::debug!(
                host = self.hostname,
                source = %event.source,
                raw = event.timestamp_str.as_deref().unwrap_or(""),
                "event without usable timestamp dropped"
            );
            return Ok(());
        };
        let line = crate::event::encode_line(
            &timestamp,
            self.hostname,
            self.source_type,
            &event.description,
            &event.source,
        )?;
        self.sorter.push(line)?;
        Ok(())
    }

    /// Events dropped for missing or unparseable timestamps.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

// --- registry ---------------------------------------------------------------

pub mod registry {
    use super::TimelinePlugin;
    use std::path::Path;

    use crate::plugins;

    /// One registered plugin family.
    pub struct Registration {
        pub name: &'static str,
        /// Builds a fresh plugin value; `aux_dir` holds the family's optional
        /// auxiliary files (tag maps, key lists), looked up by plugin name.
        pub build: fn(aux_dir: &Path) -> Box<dyn TimelinePlugin>,
        /// Families whose underlying parser is single-threaded share one
        /// mutex across their instances.
        pub needs_parser_lock: bool,
    }

    pub static REGISTRY: &[Registration] = &[
        Registration {
            name: "EventLogsToTimeline",
            build: |aux| Box::new(plugins::event_logs::EventLogsToTimeline::new(aux)),
            needs_parser_lock: false,
        },
        Registration {
            name: "RegistryToTimeline",
            build: |aux| Box::new(plugins::registry_hive::RegistryToTimeline::new(aux)),
            needs_parser_lock: true,
        },
        Registration {
            name: "AmCacheToTimeline",
            build: |_| Box::new(plugins::amcache::AmCacheToTimeline),
            needs_parser_lock: true,
        },
        Registration {
            name: "UserAssistToTimeline",
            build: |_| Box::new(plugins::userassist::UserAssistToTimeline),
            needs_parser_lock: true,
        },
        Registration {
            name: "NTFSInfoToTimeline",
            build: |_| Box::new(plugins::ntfs_info::NtfsInfoToTimeline::default()),
            needs_parser_lock: false,
        },
        Registration {
            name: "USNInfoToTimeline",
            build: |_| Box::new(plugins::usn_info::UsnInfoToTimeline),
            needs_parser_lock: false,
        },
        Registration {
            name: "I30InfoToTimeline",
            build: |_| Box::new(plugins::i30_info::I30InfoToTimeline),
            needs_parser_lock: false,
        },
        Registration {
            name: "RecycleBinToTimeline",
            build: |_| Box::new(plugins::recycle_bin::RecycleBinToTimeline),
            needs_parser_lock: false,
        },
        Registration {
            name: "FirefoxHistoryToTimeline",
            build: |_| Box::new(plugins::firefox_history::FirefoxHistoryToTimeline),
            needs_parser_lock: false,
        },
        Registration {
            name: "BrowsersHistoryToTimeline",
            build: |aux| Box::new(plugins::browsers_history::BrowsersHistoryToTimeline::new(aux)),
            needs_parser_lock: false,
        },
    ];

    pub fn lookup(name: &str) -> Option<&'static Registration> {
        REGISTRY.iter().find(|r| r.name == name)
    }
}

// --- instance execution -----------------------------------------------------

/// Everything one phase-1 task needs.
pub struct InstanceContext {
    pub plan: InstancePlan,
    /// Scratch directory owned by this instance; removed by the caller with
    /// the host scratch tree.
    pub scratch_dir: PathBuf,
    pub partial_timeline_path: PathBuf,
    pub chunk_size: usize,
    pub aux_dir: PathBuf,
    /// Shared mutex for plugin families with a single-threaded parser.
    pub parser_lock: Option<Arc<Mutex<()>>>,
    pub cancel: CancelFlag,
}

/// Outcome of one plugin instance, reported to the scheduler.
#[derive(Debug)]
pub struct InstanceReport {
    pub plugin: String,
    pub hostname: String,
    pub archive: String,
    pub sub_archive: Option<String>,
    pub events_written: u64,
    pub files_parsed: u64,
    pub files_skipped: u64,
    pub failure: Option<String>,
}

/// Run one plugin instance end to end: extract, filter, parse, sort, merge
/// runs into the partial timeline.
///
/// Parse failures on individual artefacts are logged and counted, not
/// propagated; an instance-level failure (unreadable outer archive, sorter
/// I/O) yields a report with an empty partial timeline so peers continue.
pub fn run_instance(ctx: &InstanceContext) -> InstanceReport {
    let plugin_name = ctx.plan.spec.name.clone();
    let mut report = InstanceReport {
        plugin: plugin_name.clone(),
        hostname: ctx.plan.hostname.clone(),
        archive: ctx.plan.spec.archive.clone(),
        sub_archive: ctx.plan.spec.sub_archive.clone(),
        events_written: 0,
        files_parsed: 0,
        files_skipped: 0,
        failure: None,
    };

    let Some(registration) = registry::lookup(&plugin_name) else {
        report.failure = Some(format!("plugin {plugin_name} is not registered"));
        return report;
    };
    let mut plugin = (registration.build)(&ctx.aux_dir);

    match run_instance_inner(ctx, plugin.as_mut(), registration.needs_parser_lock, &mut report) {
        Ok(()) => {}
        Err(message) => {
            tracing::warn!(
                host = report.hostname,
                plugin = report.plugin,
                error = %message,
                "plugin instance failed, its partial timeline is empty"
            );
            report.failure = Some(message);
            report.events_written = 0;
            // The host merge expects one partial per instance.
            let _ = std::fs::write(&ctx.partial_timeline_path, b"");
        }
    }
    report
}

fn run_instance_inner(
    ctx: &InstanceContext,
    plugin: &mut dyn TimelinePlugin,
    needs_lock: bool,
    report: &mut InstanceReport,
) -> Result<(), String> {
    tracing::debug!(
        host = report.hostname,
        plugin = report.plugin,
        archive = report.archive,
        sub_archive = report.sub_archive.as_deref().unwrap_or("-"),
        "plugin instance started"
    );

    let extraction = extract::extract_for_instance(
        &ctx.plan.outer_path,
        ctx.plan.spec.sub_archive.as_deref(),
        &ctx.plan.spec.match_pattern,
        &ctx.scratch_dir,
        &ctx.cancel,
    )
    .map_err(|e| match e {
        ExtractError::Cancelled => "interrupted".to_string(),
        other => other.to_string(),
    })?;
    report.files_skipped += extraction.skipped_archives;

    let mut artefacts = extraction.artefacts;
    if let Some(header) = plugin.file_header() {
        artefacts = extract::retain_matching_header(artefacts, header)
            .map_err(|e| e.to_string())?;
    }

    let mut sorter = ExternalSorter::new(&ctx.scratch_dir.join("runs"), ctx.chunk_size);
    let mut sink = EventSink::new(&ctx.plan.hostname, &ctx.plan.spec.source_type, &mut sorter);

    for artefact in &artefacts {
        if ctx.cancel.is_cancelled() {
            return Err("interrupted".to_string());
        }
        tracing::debug!(
            host = report.hostname,
            archive = report.archive,
            file = %artefact.file_name(),
            "parsing artefact"
        );
        let parse_result = if needs_lock {
            let guard = ctx
                .parser_lock
                .as_ref()
                .map(|lock| lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner));
            let result = plugin.parse_artefact(artefact, &mut sink);
            drop(guard);
            result
        } else {
            plugin.parse_artefact(artefact, &mut sink)
        };
        match parse_result {
            Ok(()) => report.files_parsed += 1,
            Err(PluginError::Cancelled) => return Err("interrupted".to_string()),
            Err(err) => {
                report.files_skipped += 1;
                tracing::warn!(
                    host = report.hostname,
                    plugin = report.plugin,
                    file = %artefact.file_name(),
                    error = %err,
                    "error while parsing artefact, file skipped"
                );
            }
        }
    }

    plugin.finalize(&mut sink).map_err(|e| e.to_string())?;
    let dropped = sink.dropped();
    if dropped > 0 {
        tracing::debug!(
            host = report.hostname,
            plugin = report.plugin,
            dropped,
            "events dropped for missing timestamps"
        );
    }

    report.events_written = sorter
        .finish(&ctx.partial_timeline_path)
        .map_err(|e| e.to_string())?;

    tracing::debug!(
        host = report.hostname,
        plugin = report.plugin,
        events = report.events_written,
        "plugin instance ended"
    );
    Ok(())
}
