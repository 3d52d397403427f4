use tracing::{debug, error, info};

use crate::backend::{self, ExecutionBackend, RUN_OUTPUT_FILE};
use crate::bench::{select, BenchmarkCase};
use crate::compile::{self, BuildOutcome};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::reference::{CompareRecorder, CreateRecorder, DiffRecorder, Recorder};
use crate::scan::scan_output;
use crate::validate::{RunContext, ValidatorRegistry};
use crate::workdir::{self, RunKey};

/// What to do with the observables a validation callback records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Check against stored references (the CI gate).
    Compare,
    /// Write new references from this run.
    Generate,
    /// Report differences for human triage, never failing.
    Diff,
}

#[derive(Debug)]
pub struct RunSummary {
    pub build: BuildOutcome,
    /// Benchmarks processed to completion, in order.
    pub benchmarks: Vec<String>,
}

/// Drives the whole pipeline: selection, compilation, then per benchmark
/// execution, output scanning and validation. The first failing stage aborts
/// the batch; a failed benchmark keeps its workdir for inspection while a
/// passing one is reaped.
pub fn run(
    config: &HarnessConfig,
    registry: &ValidatorRegistry,
    pattern: &str,
    mode: Mode,
    compile_only: bool,
) -> Result<RunSummary> {
    let cases = select(config, registry, pattern)?;
    if !cases.is_empty() {
        info!(
            benchmarks = ?cases.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
            "selected benchmarks"
        );
    }

    let backend = backend::backend_for(config);
    let build = compile::ensure_built(config, backend.as_ref())?;
    if compile_only {
        match build {
            BuildOutcome::Rebuilt => info!("compilation succeeded"),
            BuildOutcome::Skipped => info!("compilation not needed"),
        }
        return Ok(RunSummary {
            build,
            benchmarks: Vec::new(),
        });
    }

    let mut processed = Vec::new();
    for case in &cases {
        process_benchmark(config, registry, backend.as_ref(), case, mode)?;
        processed.push(case.id.clone());
    }
    info!("everything passed");
    Ok(RunSummary {
        build,
        benchmarks: processed,
    })
}

fn process_benchmark(
    config: &HarnessConfig,
    registry: &ValidatorRegistry,
    backend: &dyn ExecutionBackend,
    case: &BenchmarkCase,
    mode: Mode,
) -> Result<()> {
    let key = RunKey::new(case.id.clone(), config.mpi, config.omp);
    let (leaf, existed) = workdir::resolve(&config.workdirs_root(), &key)?;

    // Generate mode trusts a pre-existing workdir to still hold the outputs
    // of a previously successful run.
    let execute = !(existed && mode == Mode::Generate);
    if execute {
        let command = config.format_run_command(&case.scenario, RUN_OUTPUT_FILE);
        info!(
            bench = %case.id,
            mpi = config.mpi,
            omp = config.omp,
            "running benchmark"
        );
        let outcome = backend.run(&command, &leaf)?;
        if !outcome.success() {
            error!(bench = %case.id, status = outcome.status, "simulation run failed");
            return Err(HarnessError::Execution(format!(
                "benchmark {} exited with status {}, workdir kept at {}",
                case.id,
                outcome.status,
                leaf.display()
            )));
        }
    } else {
        debug!(bench = %case.id, "reusing existing workdir outputs");
    }

    let run_output = leaf.join(RUN_OUTPUT_FILE);
    if run_output.exists() {
        let hits = scan_output(&run_output)?;
        if !hits.is_empty() {
            println!("Errors appeared while running the simulation:");
            println!("---------------------------------------------");
            for hit in &hits {
                println!("{}", hit);
            }
            return Err(HarnessError::Execution(format!(
                "benchmark {} reported {} error line(s) in its output",
                case.id,
                hits.len()
            )));
        }
    }

    // Callback resolution comes before any reference-store access.
    let validator = registry.get(&case.id).ok_or_else(|| {
        HarnessError::Execution(format!(
            "no validation callback registered for benchmark {}",
            case.id
        ))
    })?;

    let references = config.references_root();
    let mut recorder: Box<dyn Recorder> = match mode {
        Mode::Generate => Box::new(CreateRecorder::new(&references, &case.id)),
        Mode::Compare => Box::new(CompareRecorder::load(&references, &case.id)?),
        Mode::Diff => Box::new(DiffRecorder::load(&references, &case.id)?),
    };
    let ctx = RunContext {
        bench: case.id.clone(),
        scenario: case.scenario.clone(),
        workdir: leaf.clone(),
    };
    match mode {
        Mode::Generate => info!(bench = %case.id, "generating reference"),
        Mode::Compare => info!(bench = %case.id, "validating against reference"),
        Mode::Diff => info!(bench = %case.id, "showing differences to reference"),
    }
    validator.run(recorder.as_mut(), &ctx)?;
    recorder.finalize()?;

    // Only a fully successful pass reaps the workdir tree.
    workdir::reap(&config.workdirs_root(), &key);
    Ok(())
}
