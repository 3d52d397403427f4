use std::fs;
use std::path::Path;

use crate::error::{HarnessError, Result};

/// Scans a captured output file for failure markers. The simulation reports
/// problems as lines containing "error" in any case, sometimes while still
/// exiting zero, so the scan runs even after a clean exit status.
pub fn scan_output(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path).map_err(|e| HarnessError::io(path, e))?;
    Ok(text
        .lines()
        .filter(|line| line.to_ascii_lowercase().contains("error"))
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn scan_matches_case_insensitively() {
        let dir = TempDir::new().expect("tempdir");
        let out = dir.path().join("sim_run.out");
        fs::write(
            &out,
            "step 1 ok\nERROR: field diverged\nstep 2 ok\nsome Error midway\n",
        )
        .expect("write");
        let hits = scan_output(&out).expect("scan");
        assert_eq!(
            hits,
            vec![
                "ERROR: field diverged".to_string(),
                "some Error midway".to_string()
            ]
        );
    }

    #[test]
    fn clean_output_has_no_hits() {
        let dir = TempDir::new().expect("tempdir");
        let out = dir.path().join("sim_run.out");
        fs::write(&out, "step 1 ok\nstep 2 ok\n").expect("write");
        assert!(scan_output(&out).expect("scan").is_empty());
    }

    #[test]
    fn missing_output_file_is_an_execution_error() {
        let dir = TempDir::new().expect("tempdir");
        let err = scan_output(&dir.path().join("sim_run.out")).expect_err("must fail");
        assert_eq!(err.exit_code(), 2);
    }
}
