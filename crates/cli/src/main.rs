// concord - inter-rater reliability and consensus runner
// Wraps concord-recon: load a project, compute agreement, merge, adjudicate.

mod exit_codes;
mod project;
mod report;
mod run;
mod util;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use exit_codes::{recon_exit_code, EXIT_RUNTIME, EXIT_SUCCESS};

#[derive(Parser)]
#[command(name = "concord")]
#[command(about = "Inter-rater agreement and consensus merge for coded datasets")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// Show debug-level engine logs (overridden by RUST_LOG)
    #[arg(long, short = 'v', global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only show warnings and errors
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a project config and its vocabularies
    #[command(after_help = "\
Examples:
  concord validate project.toml")]
    Validate {
        /// Path to the project TOML
        config: PathBuf,
    },

    /// Compute agreement and consensus, write reports and the worksheet
    #[command(after_help = "\
Examples:
  concord run project.toml
  concord run project.toml --out results/
  concord run project.toml --json > result.json")]
    Run {
        /// Path to the project TOML
        config: PathBuf,

        /// Directory for agreement.csv, consensus.csv, worksheet.csv,
        /// issues.csv and irr_report.txt (default: the config's directory)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Print the full result as a single JSON document on stdout
        #[arg(long)]
        json: bool,

        /// Also write the JSON result to this file
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Import a completed adjudication worksheet and re-run
    #[command(after_help = "\
Examples:
  concord resolve project.toml --worksheet worksheet.csv --adjudicator lead")]
    Resolve {
        /// Path to the project TOML
        config: PathBuf,

        /// Completed worksheet (the final_value column filled in)
        #[arg(long)]
        worksheet: PathBuf,

        /// Adjudicator id recorded on rows that do not name one
        #[arg(long, env = "CONCORD_ADJUDICATOR")]
        adjudicator: String,

        /// Output directory (default: the config's directory)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Print the full result as a single JSON document on stdout
        #[arg(long)]
        json: bool,
    },
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (",
        env!("GIT_COMMIT_HASH"),
        ")",
        "\nengine:  concord-recon ",
        env!("CARGO_PKG_VERSION"),
        "\ntarget:  ",
        env!("TARGET"),
    )
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default = if verbose {
        "concord=debug"
    } else if quiet {
        "concord=warn"
    } else {
        "concord=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Validate { config } => run::cmd_validate(config),
        Commands::Run {
            config,
            out,
            json,
            output,
        } => run::cmd_run(config, out, json, output),
        Commands::Resolve {
            config,
            worksheet,
            adjudicator,
            out,
            json,
        } => run::cmd_resolve(config, worksheet, adjudicator, out, json),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError {
            code,
            message,
            hint,
        }) => {
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
        Self {
            code,
            message: msg.into(),
            hint: None,
        }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(EXIT_RUNTIME, msg)
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<concord_recon::ReconError> for CliError {
    fn from(err: concord_recon::ReconError) -> Self {
        Self::new(recon_exit_code(&err), err.to_string())
    }
}
