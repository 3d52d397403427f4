use std::io::BufRead;
use std::path::PathBuf;

use globset::Glob;
use tracing::info;
use walkdir::WalkDir;

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::validate::ValidatorRegistry;

/// One selected benchmark: a scenario file plus the location of its
/// validation callback (none for natively registered callbacks). Immutable
/// once selection has resolved it.
#[derive(Debug, Clone)]
pub struct BenchmarkCase {
    pub id: String,
    pub scenario: PathBuf,
    pub validator_source: Option<PathBuf>,
}

/// Sentinel pattern asking for interactive benchmark entry.
pub const INTERACTIVE_PATTERN: &str = "?";

fn scenario_ids(config: &HarnessConfig) -> Vec<String> {
    let mut ids: Vec<String> = WalkDir::new(config.benches_root())
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    ids.sort();
    ids
}

fn case_for(config: &HarnessConfig, registry: &ValidatorRegistry, id: &str) -> BenchmarkCase {
    BenchmarkCase {
        id: id.to_string(),
        scenario: config.benches_root().join(id),
        validator_source: registry
            .get(id)
            .and_then(|v| v.source())
            .map(|p| p.to_path_buf()),
    }
}

/// Resolves a benchmark pattern to an ordered list of cases.
///
/// Empty pattern: every benchmark with a registered validation callback.
/// `?`: interactive prompting. Exact identifier: that benchmark, eligible or
/// not (an ineligible one fails later, during validation). Anything else is
/// treated as a glob; a glob that matches no scenario at all is an
/// invocation error, while matches are filtered down to eligible benchmarks.
pub fn select(
    config: &HarnessConfig,
    registry: &ValidatorRegistry,
    pattern: &str,
) -> Result<Vec<BenchmarkCase>> {
    if pattern == INTERACTIVE_PATTERN {
        let stdin = std::io::stdin();
        let mut lines = stdin.lock();
        return select_interactive(config, registry, &mut lines);
    }
    let all = scenario_ids(config);
    let eligible: Vec<&String> = all.iter().filter(|id| registry.contains(id)).collect();

    if pattern.is_empty() {
        return Ok(eligible
            .into_iter()
            .map(|id| case_for(config, registry, id))
            .collect());
    }

    if all.iter().any(|id| id == pattern) {
        return Ok(vec![case_for(config, registry, pattern)]);
    }

    let glob = Glob::new(pattern)
        .map_err(|e| HarnessError::Invocation(format!("invalid benchmark pattern: {}", e)))?
        .compile_matcher();
    let matched: Vec<&String> = all.iter().filter(|id| glob.is_match(id.as_str())).collect();
    if matched.is_empty() {
        return Err(HarnessError::Invocation(format!(
            "benchmark '{}' matches nothing under {}",
            pattern,
            config.benches_root().display()
        )));
    }
    Ok(matched
        .into_iter()
        .filter(|id| registry.contains(id))
        .map(|id| case_for(config, registry, id))
        .collect())
}

/// Prompts the operator for one benchmark identifier at a time until an
/// eligible one is entered.
pub fn select_interactive(
    config: &HarnessConfig,
    registry: &ValidatorRegistry,
    input: &mut dyn BufRead,
) -> Result<Vec<BenchmarkCase>> {
    let all = scenario_ids(config);
    let eligible: Vec<&String> = all.iter().filter(|id| registry.contains(id)).collect();
    for id in &eligible {
        println!("{}", id);
    }
    println!("Enter a benchmark from the list above:");
    loop {
        let mut line = String::new();
        let read = input
            .read_line(&mut line)
            .map_err(|e| HarnessError::io("stdin", e))?;
        if read == 0 {
            return Err(HarnessError::Invocation(
                "no benchmark entered before end of input".into(),
            ));
        }
        let candidate = line.trim();
        if eligible.iter().any(|id| *id == candidate) {
            info!(bench = candidate, "benchmark chosen interactively");
            return Ok(vec![case_for(config, registry, candidate)]);
        }
        println!("Benchmark {} invalid. Try again.", candidate);
    }
}
