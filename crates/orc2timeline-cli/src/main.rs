mod commands;
mod error;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use error::CliError;
use orc2timeline_core::{CancelFlag, Config};

#[derive(Parser)]
#[command(
    name = "orc2timeline",
    version,
    about = "Generate a per-host timeline from DFIR-ORC collection archives"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Print log messages of this level and higher
    #[arg(
        long,
        global = true,
        default_value = "INFO",
        value_parser = ["DEBUG", "INFO", "WARNING", "ERROR"]
    )]
    log_level: String,

    /// Directory where to write temporary files into; the TMPDIR environment
    /// variable is honoured when this is not given
    #[arg(long, global = true)]
    tmp_dir: Option<PathBuf>,

    /// Overwrite destination files if they already exist
    #[arg(long, global = true)]
    overwrite: bool,

    /// Number of parallel workers
    #[arg(short = 'j', long, global = true, default_value_t = 1)]
    jobs: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the timeline for one host from its ORC archives
    #[command(name = "process")]
    Process {
        /// ORC archives, all belonging to the same host
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Result file, must end in .csv.gz
        output_path: PathBuf,
    },

    /// Process every ORC found under INPUT_DIR, one timeline per host
    #[command(name = "process_dir")]
    ProcessDir {
        input_dir: PathBuf,
        output_dir: PathBuf,
    },

    /// Show the path of the configuration file
    #[command(name = "show_conf_file")]
    ShowConfFile,

    /// Show the parsed configuration
    #[command(name = "show_conf")]
    ShowConf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(error) => {
            tracing::error!("{error}");
            error.exit_code()
        }
    };
    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = Config::load_default()?;

    let cancel = CancelFlag::new();
    let signal_flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing current members then exiting");
            signal_flag.cancel();
        }
    });

    match cli.command {
        Commands::Process { files, output_path } => {
            commands::process::execute(
                &config,
                &files,
                &output_path,
                cli.jobs,
                cli.overwrite,
                cli.tmp_dir,
                cancel,
            )
            .await
        }
        Commands::ProcessDir {
            input_dir,
            output_dir,
        } => {
            commands::process_dir::execute(
                &config,
                &input_dir,
                &output_dir,
                cli.jobs,
                cli.overwrite,
                cli.tmp_dir,
                cancel,
            )
            .await
        }
        Commands::ShowConfFile => commands::show_conf::show_conf_file(&config),
        Commands::ShowConf => commands::show_conf::show_conf(&config),
    }
}
