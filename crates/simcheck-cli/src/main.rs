use clap::error::ErrorKind;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use simcheck_runner::{run, HarnessConfig, Mode, ValidatorRegistry};

/// Regression gate for the simulation binary: builds it when stale, runs the
/// requested benchmarks and validates their observables against stored
/// references.
#[derive(Parser)]
#[command(name = "simcheck", version)]
struct Cli {
    /// Benchmark(s) to validate: exact name, glob pattern, or '?' to pick
    /// interactively. Default: all benchmarks with a validation manifest.
    #[arg(short = 'b', value_name = "pattern", default_value = "")]
    bench: String,

    /// Number of threads used for the execution
    #[arg(short = 'o', value_name = "threads")]
    omp: Option<u32>,

    /// Number of processes used for the execution
    #[arg(short = 'm', value_name = "procs")]
    mpi: Option<u32>,

    /// Generate references instead of comparing against them
    #[arg(short = 'g', conflicts_with = "show_diff")]
    generate: bool,

    /// Show differences with the references instead of gating on them
    #[arg(short = 's')]
    show_diff: bool,

    /// Compile only, skipping the benchmark pipeline
    #[arg(short = 'c')]
    compile_only: bool,

    /// Verbose diagnostics
    #[arg(short = 'v')]
    verbose: bool,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            std::process::exit(0);
        }
        // Any other parse problem is a bad invocation, exit code 4.
        Err(e) => {
            let _ = e.print();
            std::process::exit(4);
        }
    };

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mode = if cli.generate {
        Mode::Generate
    } else if cli.show_diff {
        Mode::Diff
    } else {
        Mode::Compare
    };

    let outcome = HarnessConfig::resolve(cli.mpi, cli.omp, cli.verbose)
        .and_then(|config| {
            let registry = ValidatorRegistry::from_manifest_dir(&config.validation_root())?;
            run(&config, &registry, &cli.bench, mode, cli.compile_only)
        });
    if let Err(e) = outcome {
        error!("{}", e);
        std::process::exit(e.exit_code());
    }
}
