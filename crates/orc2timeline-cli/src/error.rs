//! CLI error type and exit-code mapping.

use orc2timeline_core::{ConfigError, InputError};

/// Each variant carries enough context for a user-facing message; the
/// `exit_code()` method maps errors to process exit codes.
///
/// | Code | Meaning                                      |
/// |------|----------------------------------------------|
/// | 0    | Success                                      |
/// | 1    | Processing failed for at least one host      |
/// | 2    | Invalid arguments or bad input               |
/// | 3    | Configuration error                          |
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Bad command-line usage (missing parent directory, wrong extension).
    #[error("{0}")]
    Usage(String),

    /// Bad input set: unparseable ORC names, mixed or duplicated hosts.
    #[error(transparent)]
    Input(#[from] InputError),

    /// An output file already exists and `--overwrite` was not given.
    #[error("output file '{0}' already exists, use '--overwrite' if you know what you are doing")]
    OutputExists(String),

    /// Configuration loading or validation failure.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// At least one host failed during processing while others completed.
    #[error("processing failed for {failed} host(s) out of {total}")]
    Processing { failed: usize, total: usize },

    /// Run-level infrastructure failure (scratch dir, worker pool).
    #[error(transparent)]
    Run(#[from] anyhow::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) | Self::Input(_) | Self::OutputExists(_) => 2,
            Self::Config(_) => 3,
            Self::Processing { .. } | Self::Run(_) => 1,
        }
    }
}
