use std::path::PathBuf;
use thiserror::Error;

/// Failure taxonomy for a harness run. Each variant maps to the process
/// exit code the CI gate keys on.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("invalid invocation: {0}")]
    Invocation(String),

    #[error("compilation failed: {0}")]
    Compilation(String),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl HarnessError {
    /// Exit code contract: 0 pass, 1 validation, 2 execution, 3 compilation,
    /// 4 bad invocation. I/O and serialization faults count as execution
    /// failures since they occur while driving the pipeline.
    pub fn exit_code(&self) -> i32 {
        match self {
            HarnessError::Invocation(_) => 4,
            HarnessError::Compilation(_) => 3,
            HarnessError::Execution(_) | HarnessError::Io { .. } | HarnessError::Json(_) => 2,
            HarnessError::Validation(_) => 1,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HarnessError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
