//! Regression-validation harness for a scientific simulation binary.
//!
//! The pipeline builds the binary when stale, executes selected benchmarks
//! through a pluggable execution backend, scans the captured output, and
//! checks recorded observables against stored references (or regenerates
//! them, or reports differences).

pub mod backend;
pub mod bench;
pub mod compile;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod reference;
pub mod scan;
pub mod validate;
pub mod workdir;

pub use backend::{ExecutionBackend, ExecutionOutcome};
pub use bench::BenchmarkCase;
pub use compile::BuildOutcome;
pub use config::{BackendKind, HarnessConfig, ROOT_ENV_VAR};
pub use error::{HarnessError, Result};
pub use orchestrator::{run, Mode, RunSummary};
pub use reference::{ObservableValue, Recorder};
pub use validate::{RunContext, ValidatorRegistry};
