use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{HarnessError, Result};
use crate::reference::{ObservableValue, Recorder};

/// Fixed name of the observables file a simulation run leaves in its workdir.
pub const OBSERVABLES_FILE: &str = "observables.json";

/// Manifest file name for one benchmark's validation callback.
pub fn manifest_name(bench: &str) -> String {
    format!("validate_{}.json", bench)
}

/// Everything a validation callback may need about the run being checked.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub bench: String,
    pub scenario: PathBuf,
    pub workdir: PathBuf,
}

pub type ValidatorFn = Box<dyn Fn(&mut dyn Recorder, &RunContext) -> Result<()> + Send + Sync>;

/// A benchmark's registered validation callback: either a native Rust
/// closure or a declarative manifest interpreted by the harness.
pub enum Validator {
    Native(ValidatorFn),
    Manifest(PathBuf),
}

impl Validator {
    pub fn run(&self, recorder: &mut dyn Recorder, ctx: &RunContext) -> Result<()> {
        match self {
            Validator::Native(f) => f(recorder, ctx),
            Validator::Manifest(path) => run_manifest(path, recorder, ctx),
        }
    }

    /// Path of the callback definition, when it lives on disk.
    pub fn source(&self) -> Option<&Path> {
        match self {
            Validator::Native(_) => None,
            Validator::Manifest(path) => Some(path),
        }
    }
}

/// Validation callbacks resolved by benchmark identifier. A benchmark is
/// eligible for selection only when an entry exists here.
#[derive(Default)]
pub struct ValidatorRegistry {
    entries: BTreeMap<String, Validator>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one manifest-backed validator per `validate_<bench>.json`
    /// found in the validation directory. Manifests are parsed lazily, at
    /// validation time.
    pub fn from_manifest_dir(validation_root: &Path) -> Result<Self> {
        let mut registry = ValidatorRegistry::new();
        if !validation_root.is_dir() {
            return Ok(registry);
        }
        for entry in WalkDir::new(validation_root)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let bench = match name
                .strip_prefix("validate_")
                .and_then(|rest| rest.strip_suffix(".json"))
            {
                Some(b) if !b.is_empty() => b.to_string(),
                _ => continue,
            };
            debug!(bench, manifest = %entry.path().display(), "registered manifest validator");
            registry
                .entries
                .insert(bench, Validator::Manifest(entry.path().to_path_buf()));
        }
        Ok(registry)
    }

    pub fn register(&mut self, bench: impl Into<String>, f: ValidatorFn) {
        self.entries.insert(bench.into(), Validator::Native(f));
    }

    pub fn contains(&self, bench: &str) -> bool {
        self.entries.contains_key(bench)
    }

    pub fn get(&self, bench: &str) -> Option<&Validator> {
        self.entries.get(bench)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    quantities: Vec<Quantity>,
}

#[derive(Debug, Deserialize)]
struct Quantity {
    name: String,
    #[serde(default)]
    precision: Option<f64>,
}

/// Interprets a declarative manifest: reads the run's observables file and
/// records each named quantity with its configured comparison precision.
fn run_manifest(manifest_path: &Path, recorder: &mut dyn Recorder, ctx: &RunContext) -> Result<()> {
    let raw = fs::read_to_string(manifest_path)
        .map_err(|e| HarnessError::io(manifest_path, e))?;
    let manifest: Manifest = serde_json::from_str(&raw).map_err(|e| {
        HarnessError::Execution(format!(
            "unreadable validation manifest {}: {}",
            manifest_path.display(),
            e
        ))
    })?;

    let observables_path = ctx.workdir.join(OBSERVABLES_FILE);
    let raw = fs::read_to_string(&observables_path).map_err(|_| {
        HarnessError::Execution(format!(
            "simulation left no {} in {}",
            OBSERVABLES_FILE,
            ctx.workdir.display()
        ))
    })?;
    let observables: serde_json::Value = serde_json::from_str(&raw).map_err(|e| {
        HarnessError::Execution(format!(
            "unreadable observables file {}: {}",
            observables_path.display(),
            e
        ))
    })?;

    for quantity in &manifest.quantities {
        let value = observables.get(&quantity.name).ok_or_else(|| {
            HarnessError::Execution(format!(
                "observable '{}' missing from {}",
                quantity.name,
                observables_path.display()
            ))
        })?;
        let value = ObservableValue::from_json(value)?;
        recorder.record(&quantity.name, value, quantity.precision)?;
    }
    Ok(())
}
