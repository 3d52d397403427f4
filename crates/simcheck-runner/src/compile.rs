use std::fs;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::backend::ExecutionBackend;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};

pub const COMPILE_OUT: &str = "compilation_out";
pub const COMPILE_OUT_TMP: &str = "compilation_out_tmp";
pub const COMPILE_ERRORS: &str = "compilation_errors";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// The build ran but produced the same binary the cache already holds.
    Skipped,
    /// A new binary was produced and copied into the cache slot.
    Rebuilt,
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).map_err(|e| HarnessError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|e| HarnessError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn mtime(path: &Path) -> Result<std::time::SystemTime> {
    let meta = fs::metadata(path).map_err(|e| HarnessError::io(path, e))?;
    meta.modified().map_err(|e| HarnessError::io(path, e))
}

/// Archives the live workdir tree (cached binary, logs, benchmark workdirs)
/// under a stamp taken from the cached binary, then recreates an empty root.
fn archive_workdirs(config: &HarnessConfig) -> Result<()> {
    let root = config.workdirs_root();
    let cached = config.cached_binary();
    if !cached.exists() {
        return Ok(());
    }
    crate::workdir::archive(&root, &cached)?;
    fs::create_dir(&root).map_err(|e| HarnessError::io(&root, e))?;
    Ok(())
}

/// Builds the simulation binary when stale and keeps the cache slot current.
///
/// The build command always runs (it is the only way to observe staleness of
/// the sources); whether anything changed is judged afterwards by comparing
/// the freshly produced binary against the cached copy.
pub fn ensure_built(
    config: &HarnessConfig,
    backend: &dyn ExecutionBackend,
) -> Result<BuildOutcome> {
    let workdirs = config.workdirs_root();
    if !workdirs.exists() {
        fs::create_dir_all(&workdirs).map_err(|e| HarnessError::io(&workdirs, e))?;
    }
    let cached = config.cached_binary();
    let source = config.source_binary();

    // Stale cache forces a clean so the build reproduces its full output.
    let stale = source.exists() && (!cached.exists() || mtime(&cached)? < mtime(&source)?);
    if stale {
        debug!("cached binary is stale, running clean step");
        let _ = backend.run(&config.clean_command, &config.root);
    }

    let errors_path = workdirs.join(COMPILE_ERRORS);
    if errors_path.exists() {
        fs::remove_file(&errors_path).map_err(|e| HarnessError::io(&errors_path, e))?;
    }

    let tmp_log = workdirs.join(COMPILE_OUT_TMP);
    let build = format!("{} > {} 2>&1", config.build_command, tmp_log.display());
    info!(command = %config.build_command, "compiling simulation binary");
    let outcome = backend.run(&build, &config.root)?;

    if !outcome.success() {
        let log = fs::read(&tmp_log).unwrap_or_default();
        archive_workdirs(config)?;
        fs::write(&errors_path, log).map_err(|e| HarnessError::io(&errors_path, e))?;
        let _ = fs::remove_file(&tmp_log);
        return Err(HarnessError::Compilation(format!(
            "build command exited with status {}, log in {}",
            outcome.status,
            errors_path.display()
        )));
    }

    if !source.exists() {
        return Err(HarnessError::Compilation(format!(
            "build succeeded but produced no binary at {}",
            source.display()
        )));
    }

    let fresh = !cached.exists()
        || sha256_file(&cached)? != sha256_file(&source)?
        || mtime(&cached)? < mtime(&source)?;

    if fresh {
        // New binary: retire the previous cache and its workdirs first.
        let log = fs::read(&tmp_log).map_err(|e| HarnessError::io(&tmp_log, e))?;
        archive_workdirs(config)?;
        fs::write(workdirs.join(COMPILE_OUT), log)
            .map_err(|e| HarnessError::io(workdirs.join(COMPILE_OUT), e))?;
        let _ = fs::remove_file(&tmp_log);
        fs::copy(&source, &cached).map_err(|e| HarnessError::io(&cached, e))?;
        info!(cached = %cached.display(), "cached freshly built binary");
        Ok(BuildOutcome::Rebuilt)
    } else {
        fs::rename(&tmp_log, workdirs.join(COMPILE_OUT))
            .map_err(|e| HarnessError::io(&tmp_log, e))?;
        debug!("binary unchanged, build counted as skipped");
        Ok(BuildOutcome::Skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;
    use crate::config::CONFIG_FILE;
    use tempfile::TempDir;

    fn config_with_build(root: &Path, build: &str) -> HarnessConfig {
        fs::write(
            root.join(CONFIG_FILE),
            serde_json::json!({
                "build_command": build,
                "clean_command": "true"
            })
            .to_string(),
        )
        .expect("write config");
        HarnessConfig::for_root(root, None, None, false).expect("config")
    }

    #[test]
    fn first_build_populates_the_cache() {
        let root = TempDir::new().expect("tempdir");
        let cfg = config_with_build(root.path(), "printf v1 > simulation; echo built");
        let outcome = ensure_built(&cfg, &LocalBackend).expect("build");
        assert_eq!(outcome, BuildOutcome::Rebuilt);
        assert_eq!(
            fs::read_to_string(cfg.cached_binary()).expect("cached"),
            "v1"
        );
        let log = fs::read_to_string(cfg.workdirs_root().join(COMPILE_OUT)).expect("log");
        assert_eq!(log.trim(), "built");
    }

    #[test]
    fn identical_rebuild_is_reported_as_skipped() {
        let root = TempDir::new().expect("tempdir");
        let cfg = config_with_build(root.path(), "test -f simulation || printf v1 > simulation");
        assert_eq!(ensure_built(&cfg, &LocalBackend).expect("first"), BuildOutcome::Rebuilt);
        assert_eq!(
            ensure_built(&cfg, &LocalBackend).expect("second"),
            BuildOutcome::Skipped
        );
    }

    #[test]
    fn changed_binary_archives_previous_workdirs() {
        let root = TempDir::new().expect("tempdir");
        let cfg = config_with_build(root.path(), "printf v1 > simulation");
        ensure_built(&cfg, &LocalBackend).expect("first");
        // leave a trace of a previous run inside the live tree
        fs::create_dir_all(cfg.workdirs_root().join("wd_case_a/4/4")).expect("wd");

        let cfg2 = config_with_build(root.path(), "printf v2-different > simulation");
        assert_eq!(
            ensure_built(&cfg2, &LocalBackend).expect("rebuild"),
            BuildOutcome::Rebuilt
        );
        assert_eq!(
            fs::read_to_string(cfg2.cached_binary()).expect("cached"),
            "v2-different"
        );
        let archives: Vec<_> = fs::read_dir(root.path())
            .expect("read root")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("workdirs_"))
            .collect();
        assert_eq!(archives.len(), 1, "one archived workdir tree expected");
        assert!(archives[0].path().join("wd_case_a").exists());
        assert!(!cfg2.workdirs_root().join("wd_case_a").exists());
    }

    #[test]
    fn failed_build_leaves_canonical_error_log() {
        let root = TempDir::new().expect("tempdir");
        let cfg = config_with_build(root.path(), "echo boom; exit 1");
        let err = ensure_built(&cfg, &LocalBackend).expect_err("build must fail");
        assert_eq!(err.exit_code(), 3);
        let log =
            fs::read_to_string(cfg.workdirs_root().join(COMPILE_ERRORS)).expect("error log");
        assert_eq!(log.trim(), "boom");
        assert!(!cfg.workdirs_root().join(COMPILE_OUT_TMP).exists());
    }

    #[test]
    fn successful_build_without_binary_is_a_compilation_error() {
        let root = TempDir::new().expect("tempdir");
        let cfg = config_with_build(root.path(), "echo nothing-linked");
        let err = ensure_built(&cfg, &LocalBackend).expect_err("no binary");
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("produced no binary"));
    }
}
