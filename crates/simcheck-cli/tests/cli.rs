use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

/// Stages a project root with a fake simulation: the build step installs a
/// shell script as the binary, and that script copies its scenario file
/// (ready-made observables JSON) into the workdir.
fn stage_root(sim_body: &str) -> TempDir {
    let root = TempDir::new().expect("tempdir should be created");
    write_file(
        &root.path().join("build.sh"),
        "cp sim.sh simulation && chmod +x simulation\n",
    );
    write_file(
        &root.path().join("sim.sh"),
        &format!("#!/bin/sh\n{}\n", sim_body),
    );
    write_file(
        &root.path().join("harness.json"),
        &serde_json::json!({
            "build_command": "sh build.sh",
            "clean_command": "true",
            "run_command": "{bin} {scenario} > {out} 2>&1"
        })
        .to_string(),
    );
    write_file(
        &root.path().join("benches/case_a"),
        r#"{"energy": 1.5, "field": [[0.0, 1.0], [2.0, 3.0]]}"#,
    );
    write_file(
        &root.path().join("validation/validate_case_a.json"),
        r#"{"quantities": [{"name": "energy", "precision": 1e-6}, {"name": "field"}]}"#,
    );
    root
}

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("parent dir should be created");
    }
    fs::write(path, content).expect("file should be written");
}

fn simcheck(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_simcheck"))
        .args(args)
        .env("SIMCHECK_ROOT", root)
        .output()
        .expect("simcheck should run")
}

const COPYING_SIM: &str = r#"echo "simulation running"
cp "$1" observables.json"#;

#[test]
fn generate_then_compare_round_trip_exits_zero() {
    let root = stage_root(COPYING_SIM);

    let generate = simcheck(root.path(), &["-b", "case_a", "-g", "-v"]);
    assert_eq!(
        generate.status.code(),
        Some(0),
        "generate should pass, stderr: {}",
        String::from_utf8_lossy(&generate.stderr)
    );
    assert!(root.path().join("references/case_a.json").exists());

    let compare = simcheck(root.path(), &["-b", "case_a"]);
    assert_eq!(
        compare.status.code(),
        Some(0),
        "compare should pass, stderr: {}",
        String::from_utf8_lossy(&compare.stderr)
    );
    // passing runs reap their workdirs
    assert!(!root.path().join("workdirs/wd_case_a").exists());
}

#[test]
fn drifted_observable_exits_one_and_keeps_workdir() {
    let root = stage_root(COPYING_SIM);
    assert_eq!(simcheck(root.path(), &["-b", "case_a", "-g"]).status.code(), Some(0));

    write_file(
        &root.path().join("benches/case_a"),
        r#"{"energy": 2.5, "field": [[0.0, 1.0], [2.0, 3.0]]}"#,
    );
    let compare = simcheck(root.path(), &["-b", "case_a", "-o", "2", "-m", "2"]);
    assert_eq!(compare.status.code(), Some(1));
    assert!(root.path().join("workdirs/wd_case_a/2/2").exists());
}

#[test]
fn failing_simulation_exits_two() {
    let root = stage_root("exit 7");
    let output = simcheck(root.path(), &["-b", "case_a"]);
    assert_eq!(
        output.status.code(),
        Some(2),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn failing_build_exits_three() {
    let root = stage_root(COPYING_SIM);
    write_file(&root.path().join("build.sh"), "echo linker blew up >&2; exit 1\n");
    let output = simcheck(root.path(), &["-b", "case_a"]);
    assert_eq!(output.status.code(), Some(3));
    let errors = fs::read_to_string(root.path().join("workdirs/compilation_errors"))
        .expect("canonical error log should exist");
    assert!(errors.contains("linker blew up"));
}

#[test]
fn conflicting_modes_exit_four() {
    let root = stage_root(COPYING_SIM);
    let output = simcheck(root.path(), &["-b", "case_a", "-g", "-s"]);
    assert_eq!(output.status.code(), Some(4));
}

#[test]
fn unknown_flag_exits_four() {
    let root = stage_root(COPYING_SIM);
    let output = simcheck(root.path(), &["--definitely-not-a-flag"]);
    assert_eq!(output.status.code(), Some(4));
}

#[test]
fn unknown_benchmark_exits_four() {
    let root = stage_root(COPYING_SIM);
    let output = simcheck(root.path(), &["-b", "no_such_case*"]);
    assert_eq!(output.status.code(), Some(4));
}

#[test]
fn compile_only_exits_zero_without_running_benchmarks() {
    let root = stage_root("exit 1");
    let first = simcheck(root.path(), &["-c", "-v"]);
    assert_eq!(
        first.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&first.stderr)
    );
    assert!(root.path().join("workdirs/simulation").exists());
    assert!(!root.path().join("workdirs/wd_case_a").exists());

    // second compile-only run against an up-to-date cache also exits 0
    let second = simcheck(root.path(), &["-c"]);
    assert_eq!(second.status.code(), Some(0));
}

#[test]
fn help_flag_exits_zero() {
    let root = stage_root(COPYING_SIM);
    let output = simcheck(root.path(), &["-h"]);
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains("-b"));
}
