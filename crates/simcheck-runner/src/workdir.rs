use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use tracing::{debug, warn};

use crate::error::{HarnessError, Result};

/// Identity of one benchmark run. The same key always maps to the same
/// directory, which is what makes workdir ownership exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunKey {
    pub bench: String,
    pub procs: u32,
    pub threads: u32,
}

impl RunKey {
    pub fn new(bench: impl Into<String>, procs: u32, threads: u32) -> Self {
        RunKey {
            bench: bench.into(),
            procs,
            threads,
        }
    }

    /// Top-level tree for this benchmark, shared by all proc/thread combos.
    pub fn bench_dir(&self, workdirs_root: &Path) -> PathBuf {
        workdirs_root.join(format!("wd_{}", self.bench))
    }

    pub fn leaf_dir(&self, workdirs_root: &Path) -> PathBuf {
        self.bench_dir(workdirs_root)
            .join(self.procs.to_string())
            .join(self.threads.to_string())
    }
}

fn create_dir_idempotent(path: &Path) -> Result<()> {
    match fs::create_dir(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(HarnessError::io(path, e)),
    }
}

/// Creates the three-level nesting for a run key, each level independently
/// idempotent. Returns the leaf path and whether it already existed (a
/// pre-existing leaf lets generate mode reuse a previous run's outputs).
pub fn resolve(workdirs_root: &Path, key: &RunKey) -> Result<(PathBuf, bool)> {
    create_dir_idempotent(workdirs_root)?;
    let bench_dir = key.bench_dir(workdirs_root);
    create_dir_idempotent(&bench_dir)?;
    create_dir_idempotent(&bench_dir.join(key.procs.to_string()))?;
    let leaf = key.leaf_dir(workdirs_root);
    let existed = leaf.exists();
    create_dir_idempotent(&leaf)?;
    debug!(leaf = %leaf.display(), existed, "resolved workdir");
    Ok((leaf, existed))
}

/// Human-readable stamp derived from an artifact's modification time,
/// second granularity. Two archivals of artifacts sharing the same second
/// collide on the same name; that is a known limitation inherited from the
/// original scheme and deliberately not papered over.
pub fn archive_stamp(artifact: &Path) -> Result<String> {
    let meta = fs::metadata(artifact).map_err(|e| HarnessError::io(artifact, e))?;
    let mtime = meta.modified().map_err(|e| HarnessError::io(artifact, e))?;
    Ok(format_stamp(mtime))
}

fn format_stamp(time: SystemTime) -> String {
    let dt: DateTime<Local> = time.into();
    dt.format("%a-%b-%d-%H-%M-%S-%Y").to_string()
}

/// Renames `dir` to `<dir>_<stamp of artifact>`, keeping the old tree around
/// for post-mortem inspection.
pub fn archive(dir: &Path, stamped_artifact: &Path) -> Result<PathBuf> {
    let stamp = archive_stamp(stamped_artifact)?;
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workdirs".to_string());
    let target = dir.with_file_name(format!("{}_{}", name, stamp));
    if target.exists() {
        warn!(
            target = %target.display(),
            "archive name already taken (same-second collision), previous archive will be lost"
        );
    }
    fs::rename(dir, &target).map_err(|e| HarnessError::io(dir, e))?;
    debug!(from = %dir.display(), to = %target.display(), "archived");
    Ok(target)
}

/// Drops a benchmark's whole workdir tree. Only called after a fully
/// successful pass; failed runs keep their workdirs.
pub fn reap(workdirs_root: &Path, key: &RunKey) {
    let bench_dir = key.bench_dir(workdirs_root);
    if let Err(e) = fs::remove_dir_all(&bench_dir) {
        if e.kind() != ErrorKind::NotFound {
            warn!(dir = %bench_dir.display(), error = %e, "failed to reap workdir");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn resolve_is_idempotent_and_preserves_contents() {
        let root = TempDir::new().expect("tempdir");
        let key = RunKey::new("case_a", 4, 2);
        let (first, existed) = resolve(root.path(), &key).expect("first resolve");
        assert!(!existed);
        assert_eq!(first, root.path().join("wd_case_a/4/2"));

        fs::write(first.join("marker"), "kept").expect("write marker");
        let (second, existed) = resolve(root.path(), &key).expect("second resolve");
        assert!(existed);
        assert_eq!(first, second);
        assert_eq!(
            fs::read_to_string(second.join("marker")).expect("marker"),
            "kept"
        );
    }

    #[test]
    fn distinct_keys_get_distinct_leaves() {
        let root = TempDir::new().expect("tempdir");
        let (a, _) = resolve(root.path(), &RunKey::new("case_a", 4, 2)).expect("a");
        let (b, _) = resolve(root.path(), &RunKey::new("case_a", 4, 4)).expect("b");
        let (c, _) = resolve(root.path(), &RunKey::new("case_b", 4, 2)).expect("c");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn archive_renames_with_artifact_stamp() {
        let root = TempDir::new().expect("tempdir");
        let dir = root.path().join("workdirs");
        fs::create_dir(&dir).expect("mkdir");
        let artifact = dir.join("simulation");
        fs::write(&artifact, "bin").expect("artifact");

        let stamp = archive_stamp(&artifact).expect("stamp");
        let archived = archive(&dir, &artifact).expect("archive");
        assert!(!dir.exists());
        assert_eq!(archived, root.path().join(format!("workdirs_{}", stamp)));
        assert!(archived.join("simulation").exists());
    }

    #[test]
    fn reap_removes_the_whole_bench_tree() {
        let root = TempDir::new().expect("tempdir");
        let key = RunKey::new("case_a", 4, 2);
        let (leaf, _) = resolve(root.path(), &key).expect("resolve");
        fs::write(leaf.join("out.dat"), "x").expect("write");
        reap(root.path(), &key);
        assert!(!key.bench_dir(root.path()).exists());
        // reaping an absent tree is not an error
        reap(root.path(), &key);
    }
}
