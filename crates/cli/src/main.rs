// SheetSync CLI - schedule and run spreadsheet imports

mod exit_codes;
mod job_file;
mod queue;
mod setup;
mod sync;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use sheetsync_config::ConfigError;
use sheetsync_io::SourceError;
use sheetsync_recon::ImportError;
use sheetsync_store::StoreError;
use tracing_subscriber::EnvFilter;

use exit_codes::{
    import_exit_code, EXIT_CONFIG_CONTEXTS, EXIT_CONFIG_JOB, EXIT_CONFIG_SETTINGS, EXIT_ERROR,
    EXIT_IMPORT_SOURCE, EXIT_QUEUE_STORE, EXIT_SUCCESS, EXIT_USAGE,
};
use job_file::JobFileError;
use setup::Setup;

#[derive(Parser)]
#[command(name = "sheetsync")]
#[command(about = "Synchronize spreadsheet rows into stored records")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts,

    #[command(subcommand)]
    command: Commands,
}

/// Locations that override settings.toml.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalOpts {
    /// Settings file (default: <config dir>/sheetsync/settings.toml)
    #[arg(long, global = true, env = "SHEETSYNC_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Context definitions (overrides `contexts` in settings)
    #[arg(long, global = true, env = "SHEETSYNC_CONTEXTS")]
    pub contexts: Option<PathBuf>,

    /// SQLite database for jobs and records (overrides `database` in settings)
    #[arg(long, global = true, env = "SHEETSYNC_DATABASE")]
    pub database: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue an import described by a job file
    #[command(after_help = "\
Examples:
  sheetsync enqueue persons.job.toml
  sheetsync enqueue persons.job.toml --json")]
    Enqueue {
        /// Job file (context, file, [columns], [arguments], [flags])
        job: PathBuf,

        /// Print the queued job as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the next due job from the queue
    #[command(after_help = "\
Examples:
  sheetsync import
  */5 * * * * sheetsync import   # from cron")]
    Import {
        /// Print the finished job as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove jobs scheduled more than N days ago
    Cleanup {
        /// Age threshold in days (default: cleanup_threshold_days from settings)
        #[arg(long)]
        days: Option<u32>,
    },

    /// List earlier jobs with the same context and arguments as a job file
    History {
        job: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// List the column headings of a spreadsheet
    Columns {
        file: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Show what one data row would become under a job's mapping
    #[command(after_help = "\
Examples:
  sheetsync preview persons.job.toml
  sheetsync preview persons.job.toml --row 12 --json")]
    Preview {
        job: PathBuf,

        /// 1-based data row (the heading row is not counted)
        #[arg(long, default_value_t = 1)]
        row: usize,

        #[arg(long)]
        json: bool,
    },

    /// Run a job file immediately, bypassing the queue
    Run {
        job: PathBuf,

        /// Print the counters as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a contexts file without touching the database
    Validate {
        /// Contexts file (default: the configured one)
        contexts: Option<PathBuf>,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    // A second init (tests) is harmless.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { contexts } => sync::cmd_validate(&cli.global, contexts),
        Commands::Columns { file, json } => sync::cmd_columns(&file, json),
        Commands::Enqueue { job, json } => {
            Setup::load(&cli.global).and_then(|s| queue::cmd_enqueue(&s, &job, json))
        }
        Commands::Import { json } => Setup::load(&cli.global).and_then(|s| queue::cmd_import(&s, json)),
        Commands::Cleanup { days } => Setup::load(&cli.global).and_then(|s| queue::cmd_cleanup(&s, days)),
        Commands::History { job, json } => {
            Setup::load(&cli.global).and_then(|s| queue::cmd_history(&s, &job, json))
        }
        Commands::Preview { job, row, json } => {
            Setup::load(&cli.global).and_then(|s| sync::cmd_preview(&s, &job, row, json))
        }
        Commands::Run { job, json } => Setup::load(&cli.global).and_then(|s| sync::cmd_run(&s, &job, json)),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn new(code: u8, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), hint: None }
    }

    pub fn args(msg: impl Into<String>) -> Self {
        Self::new(EXIT_USAGE, msg)
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(EXIT_ERROR, msg)
    }

    pub fn contexts(err: ImportError) -> Self {
        Self::new(EXIT_CONFIG_CONTEXTS, err.to_string())
            .with_hint("check the file with `sheetsync validate`")
    }

    pub fn import(err: ImportError) -> Self {
        let hint = match &err {
            ImportError::Reference { domain, .. } => {
                Some(format!("the referenced {domain} must exist before the import is queued"))
            }
            ImportError::SourceRead(SourceError::UnsupportedFormat(_)) => {
                Some("supported formats: csv, tsv, txt, xlsx, xlsm, xls, xlsb, ods".to_string())
            }
            _ => None,
        };
        Self { code: import_exit_code(&err), message: err.to_string(), hint }
    }

    pub fn source(err: SourceError) -> Self {
        Self::new(EXIT_IMPORT_SOURCE, err.to_string())
    }

    pub fn store(err: StoreError) -> Self {
        Self::new(EXIT_QUEUE_STORE, err.to_string())
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        Self::new(EXIT_CONFIG_SETTINGS, err.to_string())
    }
}

impl From<StoreError> for CliError {
    fn from(err: StoreError) -> Self {
        Self::store(err)
    }
}

impl From<JobFileError> for CliError {
    fn from(err: JobFileError) -> Self {
        match err {
            JobFileError::Import(e) => Self::import(e),
            other => Self::new(EXIT_CONFIG_JOB, other.to_string()),
        }
    }
}
