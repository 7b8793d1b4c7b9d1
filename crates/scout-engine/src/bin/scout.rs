use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use scout_engine::Orchestrator;
use scout_types::{ScoutError, StudyConfig};

/// Design-space exploration driver for parallel compute workloads: samples
/// compiler-flag and environment configurations, builds and measures each
/// candidate under LIKWID or perf, and optimizes the declared objectives.
#[derive(Parser)]
#[command(name = "scout", author, version, about)]
struct Cli {
    /// Path to the JSON study definition
    config: PathBuf,

    /// Number of trials, overriding the budget declared in the config
    #[arg(long)]
    trials: Option<u32>,

    /// Random seed, overriding `search.random_seed`
    #[arg(long)]
    seed: Option<u64>,

    /// Append to this CSV archive instead of the configured one
    #[arg(long)]
    resume: Option<PathBuf>,
}

const EXIT_CONFIG: u8 = 2;
const EXIT_BACKEND: u8 = 3;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries only the final summary report.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            match e {
                ScoutError::Config(_) | ScoutError::Space(_) => ExitCode::from(EXIT_CONFIG),
                _ => ExitCode::from(EXIT_BACKEND),
            }
        }
    }
}

fn run(cli: Cli) -> Result<(), ScoutError> {
    let mut cfg = StudyConfig::load(&cli.config)?;
    if let Some(seed) = cli.seed {
        cfg.search.random_seed = Some(seed);
    }
    if let Some(resume) = cli.resume {
        cfg.csv_log = resume;
    }
    let trials = cli.trials.unwrap_or(cfg.iterations);

    let workdir_root = tempfile::Builder::new()
        .prefix("scout_")
        .tempdir()
        .map_err(ScoutError::Io)?
        .into_path();
    info!(workdir = %workdir_root.display(), trials, "starting exploration");

    let mut orchestrator = Orchestrator::new(cfg, workdir_root)?;
    let summary = orchestrator.run(trials)?;
    println!("{summary}");
    Ok(())
}
