use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::{BackendKind, HarnessConfig};
use crate::error::{HarnessError, Result};

/// Fixed name of the captured simulation output inside a workdir. Run-command
/// templates redirect both streams here; the error scanner reads it back.
pub const RUN_OUTPUT_FILE: &str = "sim_run.out";

/// Script and capture names used by the non-local backends.
pub const EXEC_SCRIPT: &str = "exec_script.sh";
pub const EXEC_SCRIPT_OUT: &str = "exec_script.out";
pub const JOB_SCRIPT: &str = "job_script.sh";
pub const EXIT_STATUS_FILE: &str = "exit_status_file";

/// Sentinel content meaning "job not finished yet".
const PENDING_MARKER: &str = "pending";

/// Result of driving one external command to completion.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: i32,
    /// Captured combined stdout/stderr, when the command produced one.
    pub output: PathBuf,
}

impl ExecutionOutcome {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// One way of running a shell command inside a directory and learning its
/// exit status. A non-zero job status is a regular outcome; infrastructure
/// faults (spawn, submission, poll timeout) are errors.
pub trait ExecutionBackend {
    fn run(&self, command: &str, dir: &Path) -> Result<ExecutionOutcome>;
}

pub fn backend_for(config: &HarnessConfig) -> Box<dyn ExecutionBackend> {
    match config.backend {
        BackendKind::Local => Box::new(LocalBackend),
        BackendKind::Cluster => Box::new(ClusterBackend {
            setup: config.cluster_setup.clone(),
            omp: config.omp,
        }),
        BackendKind::Queue => Box::new(QueueBackend {
            submit_command: config.submit_command.clone(),
            mpi: config.mpi,
            omp: config.omp,
            cores_per_node: config.cores_per_node,
            poll_interval: config.poll_interval,
            poll_timeout: config.poll_timeout,
        }),
    }
}

fn run_shell(command: &str, dir: &Path) -> Result<i32> {
    let status = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(dir)
        .status()
        .map_err(|e| HarnessError::io(dir, e))?;
    Ok(status.code().unwrap_or(-1))
}

/// Synchronous child process on the current machine.
pub struct LocalBackend;

impl ExecutionBackend for LocalBackend {
    fn run(&self, command: &str, dir: &Path) -> Result<ExecutionOutcome> {
        debug!(command, dir = %dir.display(), "running local command");
        let status = run_shell(command, dir)?;
        Ok(ExecutionOutcome {
            status,
            output: dir.join(RUN_OUTPUT_FILE),
        })
    }
}

/// Interactive cluster node: the command is wrapped in an environment-setup
/// script executed through bash, with its own capture file.
pub struct ClusterBackend {
    pub setup: Vec<String>,
    pub omp: u32,
}

impl ExecutionBackend for ClusterBackend {
    fn run(&self, command: &str, dir: &Path) -> Result<ExecutionOutcome> {
        let script_path = dir.join(EXEC_SCRIPT);
        let mut script = String::from("# environment\n");
        for line in &self.setup {
            script.push_str(line);
            script.push('\n');
        }
        script.push_str(&format!("export OMP_NUM_THREADS={}\n", self.omp));
        script.push_str(command);
        script.push('\n');
        script.push_str("exit $?\n");
        fs::write(&script_path, script).map_err(|e| HarnessError::io(&script_path, e))?;

        debug!(command, dir = %dir.display(), "running via cluster exec script");
        let status = run_shell(
            &format!("/bin/bash {} > {} 2>&1", EXEC_SCRIPT, EXEC_SCRIPT_OUT),
            dir,
        )?;
        if status != 0 {
            dump_capture(&dir.join(EXEC_SCRIPT_OUT));
            dump_capture(&dir.join(RUN_OUTPUT_FILE));
        }
        Ok(ExecutionOutcome {
            status,
            output: dir.join(RUN_OUTPUT_FILE),
        })
    }
}

fn dump_capture(path: &Path) {
    if let Ok(text) = fs::read_to_string(path) {
        debug!(capture = %path.display(), "captured output:\n{}", text);
    }
}

/// Batch scheduler: submits a resource-sized job script, then polls a
/// sentinel file until the job reports its exit status. The poll has no
/// cancellation; an optional timeout guards against a stuck queue.
pub struct QueueBackend {
    pub submit_command: String,
    pub mpi: u32,
    pub omp: u32,
    pub cores_per_node: u32,
    pub poll_interval: Duration,
    pub poll_timeout: Option<Duration>,
}

impl QueueBackend {
    fn job_script(&self, command: &str, dir: &Path) -> String {
        let cores = self.cores_per_node.max(1);
        let nodes = (self.mpi * self.omp - 1) / cores + 1;
        format!(
            "#PBS -l nodes={nodes}:ppn={cores}\n\
             #PBS -q default\n\
             #PBS -j oe\n\
             export OMP_NUM_THREADS={omp}\n\
             export OMP_SCHEDULE=DYNAMIC\n\
             cd {dir}\n\
             {command}\n\
             echo $? > {sentinel}\n",
            nodes = nodes,
            cores = cores,
            omp = self.omp,
            dir = dir.display(),
            command = command,
            sentinel = EXIT_STATUS_FILE,
        )
    }

    fn poll_sentinel(&self, sentinel: &Path) -> Result<i32> {
        let started = Instant::now();
        loop {
            let content = fs::read_to_string(sentinel).unwrap_or_default();
            let content = content.trim();
            if !content.is_empty() && content != PENDING_MARKER {
                return content.parse::<i32>().map_err(|_| {
                    HarnessError::Execution(format!(
                        "unreadable job exit status '{}' in {}",
                        content,
                        sentinel.display()
                    ))
                });
            }
            if let Some(timeout) = self.poll_timeout {
                if started.elapsed() >= timeout {
                    return Err(HarnessError::Execution(format!(
                        "timed out after {:?} waiting for {}",
                        timeout,
                        sentinel.display()
                    )));
                }
            }
            thread::sleep(self.poll_interval);
        }
    }
}

impl ExecutionBackend for QueueBackend {
    fn run(&self, command: &str, dir: &Path) -> Result<ExecutionOutcome> {
        let sentinel = dir.join(EXIT_STATUS_FILE);
        fs::write(&sentinel, PENDING_MARKER).map_err(|e| HarnessError::io(&sentinel, e))?;
        let script_path = dir.join(JOB_SCRIPT);
        fs::write(&script_path, self.job_script(command, dir))
            .map_err(|e| HarnessError::io(&script_path, e))?;

        let submit = format!("{} {}", self.submit_command, JOB_SCRIPT);
        let status = run_shell(&submit, dir)?;
        if status != 0 {
            return Err(HarnessError::Execution(format!(
                "job submission failed with status {}: `{}`",
                status, submit
            )));
        }
        info!(command, "job submitted, polling for completion");
        let job_status = self.poll_sentinel(&sentinel)?;
        if job_status != 0 {
            dump_capture(&dir.join(RUN_OUTPUT_FILE));
        }
        Ok(ExecutionOutcome {
            status: job_status,
            output: dir.join(RUN_OUTPUT_FILE),
        })
    }
}
