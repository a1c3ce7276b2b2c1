//! Plugin configuration: YAML loading, spec expansion, tunables.

pub mod parser;
pub mod types;

pub use types::{PluginSpec, DEFAULT_CHUNK_SIZE};

use std::path::{Path, PathBuf};

use crate::errors::ConfigError;

pub const CONFIG_FILE_NAME: &str = "Orc2Timeline.yaml";
const CONFIG_DIR_NAME: &str = "conf";

/// Immutable process-wide configuration, built once at startup and threaded
/// through the scheduler.
#[derive(Debug, Clone)]
pub struct Config {
    specs: Vec<PluginSpec>,
    chunk_size: usize,
    config_path: PathBuf,
}

impl Config {
    /// Load the configuration from its fixed installation path.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` when the file is missing, is not a file, is not
    /// valid YAML, or describes an invalid plugin table.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        Self::from_file(&path)
    }

    /// Load the configuration from an explicit file path.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Config::load_default`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Unreadable {
                path: path.to_path_buf(),
                reason: "file does not exist".to_string(),
            });
        }
        if !path.is_file() {
            return Err(ConfigError::Unreadable {
                path: path.to_path_buf(),
                reason: "is not a file".to_string(),
            });
        }
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_str_at(&text, path)
    }

    /// Parse a configuration document, recording `path` as its origin.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` on YAML or validation failure.
    pub fn from_str_at(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let (specs, chunk_size) = parser::parse_config(text, path)?;
        Ok(Self {
            specs,
            chunk_size,
            config_path: path.to_path_buf(),
        })
    }

    /// The expanded plugin spec table, one entry per (plugin, archive,
    /// sub-archive) combination, in document order.
    pub fn specs(&self) -> &[PluginSpec] {
        &self.specs
    }

    /// Number of events buffered in memory before a sorted chunk is spilled.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Absolute path of the effective configuration file.
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Directory holding plugin auxiliary files (event-ID tag maps,
    /// important-key lists). Files are looked up by plugin name; a missing
    /// file means the plugin runs without its auxiliary data.
    pub fn aux_dir(&self) -> PathBuf {
        self.config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Resolve the fixed configuration path.
///
/// The file lives in `conf/` next to the installed binary (or one level up,
/// for `target/<profile>/` layouts during development). The first existing
/// candidate wins; when none exists the primary candidate is returned so the
/// caller reports a deterministic path.
pub fn default_config_path() -> PathBuf {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Ok(exe) = std::env::current_exe() {
        let mut dir = exe.parent().map(Path::to_path_buf);
        while let Some(d) = dir {
            candidates.push(d.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME));
            dir = d.parent().map(Path::to_path_buf);
        }
    }
    // Workspace copy, for `cargo run` / `cargo test`.
    if let Some(manifest_dir) = option_env!("CARGO_MANIFEST_DIR") {
        let workspace = Path::new(manifest_dir).join("../..");
        candidates.push(workspace.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME));
    }

    for candidate in &candidates {
        if candidate.is_file() {
            return candidate.clone();
        }
    }
    candidates
        .into_iter()
        .next()
        .unwrap_or_else(|| Path::new(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}
