//! `custodia recon`: reconcile one client's positions for one date.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Subcommand;

use custodia_recon::loader::{DirectoryD1g1tSource, DirectoryFeedSource};
use custodia_recon::{FirmsConfig, ReconEngine, ReconError, ReconResult, RunRequest};

use crate::exit_codes::{EXIT_OUTPUT, EXIT_RECON_MISMATCH, EXIT_USAGE};
use crate::export;
use crate::CliError;

#[derive(Subcommand)]
pub enum ReconCommands {
    /// Reconcile a client's d1g1t positions against custodian feeds
    #[command(after_help = "\
Reads d1g1t positions from <data-dir>/d1g1t/<firm>/<date>.csv and each
custodian feed from <data-dir>/<custodian>/<feed>/<date>.csv.

Exit codes:
  0  every position reconciled
  1  mismatched or unmatched positions
  2  invalid input        3  configuration error
  4  data error           5  firm adapter failure
  6  output not written

Examples:
  custodia recon run --config firms.toml --data-dir data --firm pcr --client C100 --date 2024-03-28
  custodia recon run --config firms.toml --data-dir data --firm pcr --client C100 --date 2024-03-28 --custodian nbin --json
  custodia recon run --config firms.toml --data-dir data --firm pcr --client C100 --date 2024-03-28 --csv-dir out/")]
    Run {
        /// Firm configuration file (TOML)
        #[arg(long, env = "CUSTODIA_CONFIG")]
        config: PathBuf,

        /// Root directory holding d1g1t extracts and custodian feeds
        #[arg(long, env = "CUSTODIA_DATA_DIR")]
        data_dir: PathBuf,

        /// Firm identifier
        #[arg(long)]
        firm: String,

        /// Client identifier
        #[arg(long)]
        client: String,

        /// As-of date (YYYY-MM-DD)
        #[arg(long)]
        date: String,

        /// Custodian to reconcile against (repeatable; defaults to the firm's custodians)
        #[arg(long = "custodian")]
        custodians: Vec<String>,

        /// Output JSON to stdout instead of human summary
        #[arg(long)]
        json: bool,

        /// Write JSON output to file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Write matched/mismatched/unmatched/summary CSVs into this directory
        #[arg(long)]
        csv_dir: Option<PathBuf>,
    },

    /// Validate a firm configuration without running
    #[command(after_help = "\
Examples:
  custodia recon validate --config firms.toml")]
    Validate {
        /// Firm configuration file (TOML)
        #[arg(long, env = "CUSTODIA_CONFIG")]
        config: PathBuf,
    },
}

pub fn cmd_recon(cmd: ReconCommands) -> Result<(), CliError> {
    match cmd {
        ReconCommands::Run {
            config,
            data_dir,
            firm,
            client,
            date,
            custodians,
            json,
            output,
            csv_dir,
        } => {
            let args = RunArgs {
                firm,
                client,
                date,
                custodians,
                json,
                output,
                csv_dir,
            };
            cmd_recon_run(&config, &data_dir, args)
        }
        ReconCommands::Validate { config } => cmd_recon_validate(&config),
    }
}

struct RunArgs {
    firm: String,
    client: String,
    date: String,
    custodians: Vec<String>,
    json: bool,
    output: Option<PathBuf>,
    csv_dir: Option<PathBuf>,
}

fn cmd_recon_run(config_path: &Path, data_dir: &Path, args: RunArgs) -> Result<(), CliError> {
    let config = FirmsConfig::load(config_path)?;

    if !data_dir.is_dir() {
        return Err(CliError::new(
            EXIT_USAGE,
            format!("data directory not found: {}", data_dir.display()),
        ));
    }

    let custodians = if args.custodians.is_empty() {
        configured_custodians(&config, &args.firm)?
    } else {
        args.custodians
    };
    let request = RunRequest::parse(&args.firm, &args.client, &args.date, custodians)?;

    let engine = ReconEngine::from_config(
        config,
        Arc::new(DirectoryD1g1tSource::new(data_dir)),
        Arc::new(DirectoryFeedSource::new(data_dir)),
    );
    let result = engine.run(&request)?;

    let json_str = result
        .to_json()
        .map_err(|e| CliError::new(EXIT_OUTPUT, format!("JSON serialization error: {e}")))?;

    if let Some(ref path) = args.output {
        std::fs::write(path, &json_str)
            .map_err(|e| CliError::new(EXIT_OUTPUT, format!("cannot write output: {e}")))?;
        eprintln!("wrote {}", path.display());
    }

    if let Some(ref dir) = args.csv_dir {
        let written = export::write_csv_dir(&result, dir)
            .map_err(|e| CliError::new(EXIT_OUTPUT, format!("cannot write CSV export: {e}")))?;
        eprintln!("wrote {} files to {}", written.len(), dir.display());
    }

    if args.json {
        println!("{json_str}");
    }

    print_summary(&result);

    if !result.is_clean() {
        return Err(CliError::new(EXIT_RECON_MISMATCH, "positions did not reconcile"));
    }
    Ok(())
}

fn configured_custodians(config: &FirmsConfig, firm_id: &str) -> Result<Vec<String>, ReconError> {
    config
        .firm(firm_id)
        .map(|firm| firm.custodians.clone())
        .ok_or_else(|| ReconError::FirmNotConfigured {
            firm_id: firm_id.to_string(),
        })
}

fn print_summary(result: &ReconResult) {
    let s = &result.summary;
    eprintln!(
        "{} / {} as of {}: {} matched, {} mismatched, {} d1g1t-only, {} custodian-only",
        result.meta.firm_id,
        result.meta.client_id,
        result.meta.as_of_date,
        s.matched,
        s.mismatched,
        s.unmatched_d1g1t,
        s.unmatched_custodian,
    );
    if s.suppressed > 0 || s.dead_positions > 0 {
        eprintln!(
            "suppressed by {}: {}, dead positions dropped: {}",
            result.meta.adapter, s.suppressed, s.dead_positions
        );
    }
    for b in &s.breaks {
        eprintln!(
            "  {:<12} {:<10} {:>5} / {:<5} {}%",
            b.custodian_id, b.metric, b.breaks, b.total, b.reconciled_pct
        );
    }
}

fn cmd_recon_validate(config_path: &Path) -> Result<(), CliError> {
    let config = FirmsConfig::load(config_path)?;

    for (custodian_id, custodian) in &config.custodians {
        if custodian.metrics.is_empty() {
            log::warn!("custodian '{custodian_id}' has no metrics; runs against it will fail");
        }
    }

    eprintln!(
        "config ok: {} firm(s), {} custodian(s)",
        config.firms.len(),
        config.custodians.len()
    );
    for (firm_id, firm) in &config.firms {
        eprintln!(
            "  {:<12} adapter={:<22} custodians={}",
            firm_id,
            firm.adapter.kind(),
            firm.custodians.join(",")
        );
    }
    Ok(())
}
