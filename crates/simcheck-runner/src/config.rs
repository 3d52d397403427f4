use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{HarnessError, Result};

/// Environment variable that overrides the project root. Without it the root
/// is derived from the harness executable's own location (parent of the
/// directory holding the binary).
pub const ROOT_ENV_VAR: &str = "SIMCHECK_ROOT";

/// Optional per-host command file at `<root>/harness.json`.
pub const CONFIG_FILE: &str = "harness.json";

const DEFAULT_MPI: u32 = 4;
const DEFAULT_OMP: u32 = 4;
const DEFAULT_POLL_INTERVAL_MS: u64 = 5000;
const DEFAULT_CORES_PER_NODE: u32 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Cluster,
    Queue,
}

impl BackendKind {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "local" => Ok(BackendKind::Local),
            "cluster" => Ok(BackendKind::Cluster),
            "queue" => Ok(BackendKind::Queue),
            other => Err(HarnessError::Invocation(format!(
                "unknown backend '{}' (expected local, cluster or queue)",
                other
            ))),
        }
    }
}

/// Host-specific knobs read from `harness.json`. Every field is optional;
/// missing fields fall back to the local-machine defaults.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    binary_name: Option<String>,
    #[serde(default)]
    build_command: Option<String>,
    #[serde(default)]
    clean_command: Option<String>,
    #[serde(default)]
    run_command: Option<String>,
    #[serde(default)]
    backend: Option<String>,
    #[serde(default)]
    cluster_setup: Option<Vec<String>>,
    #[serde(default)]
    submit_command: Option<String>,
    #[serde(default)]
    cores_per_node: Option<u32>,
    #[serde(default)]
    poll_interval_ms: Option<u64>,
    #[serde(default)]
    poll_timeout_ms: Option<u64>,
}

/// Immutable configuration for one harness invocation. Constructed once and
/// handed to every component; there are no ambient globals.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub root: PathBuf,
    pub binary_name: String,
    pub build_command: String,
    pub clean_command: String,
    /// Template with `{bin}`, `{scenario}`, `{mpi}`, `{omp}` and `{out}`
    /// placeholders, expanded per benchmark run.
    pub run_command: String,
    pub backend: BackendKind,
    pub cluster_setup: Vec<String>,
    pub submit_command: String,
    pub cores_per_node: u32,
    pub mpi: u32,
    pub omp: u32,
    pub poll_interval: Duration,
    pub poll_timeout: Option<Duration>,
    pub verbose: bool,
}

impl HarnessConfig {
    /// Resolves the configuration from the environment, the optional
    /// `harness.json` at the root and the requested process/thread counts.
    pub fn resolve(mpi: Option<u32>, omp: Option<u32>, verbose: bool) -> Result<Self> {
        let root = resolve_root()?;
        Self::for_root(&root, mpi, omp, verbose)
    }

    /// Same as [`HarnessConfig::resolve`] but with an explicit root, used by
    /// tests and by callers that already know where the project lives.
    pub fn for_root(
        root: &Path,
        mpi: Option<u32>,
        omp: Option<u32>,
        verbose: bool,
    ) -> Result<Self> {
        let file = load_config_file(&root.join(CONFIG_FILE))?;
        let mpi = mpi.unwrap_or(DEFAULT_MPI);
        let omp = omp.unwrap_or(DEFAULT_OMP);
        if mpi == 0 || omp == 0 {
            return Err(HarnessError::Invocation(
                "process and thread counts must be at least 1".into(),
            ));
        }
        let backend = match &file.backend {
            Some(name) => BackendKind::parse(name)?,
            None => BackendKind::Local,
        };
        Ok(HarnessConfig {
            root: root.to_path_buf(),
            binary_name: file.binary_name.unwrap_or_else(|| "simulation".into()),
            build_command: file.build_command.unwrap_or_else(|| "make -j4".into()),
            clean_command: file.clean_command.unwrap_or_else(|| "make clean".into()),
            run_command: file.run_command.unwrap_or_else(|| {
                "export OMP_NUM_THREADS={omp}; mpirun -np {mpi} {bin} {scenario} > {out} 2>&1"
                    .into()
            }),
            backend,
            cluster_setup: file.cluster_setup.unwrap_or_default(),
            submit_command: file.submit_command.unwrap_or_else(|| "qsub".into()),
            cores_per_node: file.cores_per_node.unwrap_or(DEFAULT_CORES_PER_NODE),
            mpi,
            omp,
            poll_interval: Duration::from_millis(
                file.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            poll_timeout: file.poll_timeout_ms.map(Duration::from_millis),
            verbose,
        })
    }

    pub fn workdirs_root(&self) -> PathBuf {
        self.root.join("workdirs")
    }

    pub fn references_root(&self) -> PathBuf {
        self.root.join("references")
    }

    pub fn benches_root(&self) -> PathBuf {
        self.root.join("benches")
    }

    pub fn validation_root(&self) -> PathBuf {
        self.root.join("validation")
    }

    /// The single mutable cache slot for the compiled artifact.
    pub fn cached_binary(&self) -> PathBuf {
        self.workdirs_root().join(&self.binary_name)
    }

    /// Where the build command leaves the freshly linked binary.
    pub fn source_binary(&self) -> PathBuf {
        self.root.join(&self.binary_name)
    }

    /// Expands the run-command template for one benchmark scenario.
    pub fn format_run_command(&self, scenario: &Path, output_name: &str) -> String {
        self.run_command
            .replace("{bin}", &self.cached_binary().to_string_lossy())
            .replace("{scenario}", &scenario.to_string_lossy())
            .replace("{mpi}", &self.mpi.to_string())
            .replace("{omp}", &self.omp.to_string())
            .replace("{out}", output_name)
    }
}

fn resolve_root() -> Result<PathBuf> {
    if let Some(root) = std::env::var_os(ROOT_ENV_VAR) {
        return Ok(PathBuf::from(root));
    }
    let exe = std::env::current_exe().map_err(|e| HarnessError::io("current_exe", e))?;
    // binary lives in <root>/<something>/simcheck; fall back to cwd when the
    // layout is too shallow to climb.
    exe.parent()
        .and_then(|p| p.parent())
        .map(Path::to_path_buf)
        .ok_or_else(|| {
            HarnessError::Invocation(format!(
                "cannot derive project root from executable path {} (set {})",
                exe.display(),
                ROOT_ENV_VAR
            ))
        })
}

fn load_config_file(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }
    let raw = fs::read_to_string(path).map_err(|e| HarnessError::io(path, e))?;
    let parsed = serde_json::from_str(&raw)?;
    Ok(parsed)
}
