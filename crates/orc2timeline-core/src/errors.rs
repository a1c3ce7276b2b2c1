//! Error kinds for the timeline engine.
//!
//! Fatal kinds (`ConfigError`, `InputError`) abort a run before any plugin
//! executes. The remaining kinds are scoped: extraction and parse failures
//! skip a file, an instance failure empties one partial timeline, a merge
//! failure loses one host. The CLI maps each kind to a process exit code.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Configuration loading or validation failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration file \"{}\" ({reason})", .path.display())]
    Unreadable { path: PathBuf, reason: String },

    #[error("an error occured while parsing configuration (file: {}): {source}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Semantic problems in the plugin table. Entry validation keeps going
    /// after the first bad entry so a single run reports every problem.
    #[error("invalid configuration: {problems}")]
    Invalid { problems: String },

    #[error("plugin list is empty")]
    NoPlugins,
}

/// Bad command input: unparseable ORC file names or inconsistent host sets.
#[derive(Debug, Error)]
pub enum InputError {
    #[error(
        "impossible to extract hostname from filename '{}', \
         filename must match the DFIR-ORC naming convention", .0.display()
    )]
    UnparseableName(PathBuf),

    #[error("all files must belong to the same host; parsed hosts: {{{hosts}}}")]
    MixedHosts { hosts: String },

    #[error("unable to process directory if the same host is used many times; hosts: {{{hosts}}}")]
    DuplicateHosts { hosts: String },

    #[error("{0}")]
    Invalid(String),
}

/// Failure while opening or inflating an archive member. Logged and skipped;
/// never aborts a plugin instance on its own.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unable to open {}: {message}", .archive.display())]
    Archive { archive: PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("extraction interrupted")]
    Cancelled,
}

/// Failure inside a plugin while parsing one artefact.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("error while parsing {}: {message}", .artefact.display())]
    Parse { artefact: PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("plugin interrupted")]
    Cancelled,
}

impl PluginError {
    pub fn parse(artefact: &std::path::Path, message: impl ToString) -> Self {
        Self::Parse {
            artefact: artefact.to_path_buf(),
            message: message.to_string(),
        }
    }
}

impl From<csv::Error> for PluginError {
    fn from(e: csv::Error) -> Self {
        Self::Parse {
            artefact: PathBuf::new(),
            message: e.to_string(),
        }
    }
}

/// Failure while producing a final timeline for one host.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error(
        "output file '{}' already exists, use '--overwrite' if you know what you are doing",
        .0.display()
    )]
    OutputExists(PathBuf),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("merge interrupted")]
    Cancelled,
}
