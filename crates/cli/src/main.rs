// custodia CLI - reconcile d1g1t positions against custodian feeds

mod exit_codes;
mod export;
mod recon;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use custodia_recon::{ReconError, RunError};
use exit_codes::{class_exit_code, EXIT_SUCCESS};

/// Environment variable holding the log filter, e.g. `custodia_recon=debug`.
const LOG_ENV: &str = "CUSTODIA_LOG";

#[derive(Parser)]
#[command(name = "custodia")]
#[command(about = "Firm-pluggable custodian position reconciliation")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile positions, or validate firm configuration
    #[command(subcommand)]
    Recon(recon::ReconCommands),
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (",
        env!("GIT_COMMIT_HASH"),
        ")",
        "\nengine:  custodia-recon ",
        env!("CARGO_PKG_VERSION"),
        "\ntarget:  ",
        env!("TARGET"),
    )
}

/// Route `log` records to stderr. Defaults to `info`; stdout stays reserved
/// for `--json` output.
fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Commands::Recon(cmd) => recon::cmd_recon(cmd),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError {
            code,
            message,
            hint,
        }) => {
            if !message.is_empty() {
                eprintln!("error: {message}");
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {hint}");
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

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<ReconError> for CliError {
    fn from(err: ReconError) -> Self {
        let hint = hint_for(&err);
        let cli = Self::new(class_exit_code(err.class()), err.to_string());
        match hint {
            Some(hint) => cli.with_hint(hint),
            None => cli,
        }
    }
}

impl From<RunError> for CliError {
    fn from(err: RunError) -> Self {
        let hint = hint_for(err.kind());
        let cli = Self::new(class_exit_code(err.class()), err.to_string());
        match hint {
            Some(hint) => cli.with_hint(hint),
            None => cli,
        }
    }
}

fn hint_for(err: &ReconError) -> Option<&'static str> {
    match err {
        ReconError::FirmNotConfigured { .. } => {
            Some("add the firm under [firms.<id>] in the config")
        }
        ReconError::CustodianMetric { .. } => {
            Some("add [[custodians.<id>.metrics]] entries for this custodian")
        }
        ReconError::ClientDataNotFound { .. } => {
            Some("expected d1g1t rows in <data-dir>/d1g1t/<firm>/<date>.csv")
        }
        ReconError::InputValidation { .. } => Some("dates use YYYY-MM-DD"),
        _ => None,
    }
}
