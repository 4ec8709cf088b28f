//! End-to-end test: create a project, instrument it, build it, run it, and
//! verify the rendered report on stderr.

use std::fs;
use std::path::Path;
use std::process::Command;

/// Create a minimal Rust project whose watched routine sleeps a measurable
/// amount on known lines.
fn create_mini_project(dir: &Path) {
    fs::create_dir_all(dir.join("src")).unwrap();

    fs::write(
        dir.join("Cargo.toml"),
        r#"[package]
name = "mini"
version = "0.1.0"
edition = "2021"

[[bin]]
name = "mini"
path = "src/main.rs"
"#,
    )
    .unwrap();

    fs::write(
        dir.join("src").join("main.rs"),
        r#"use std::time::Duration;

fn main() {
    let result = work();
    println!("result: {result}");
}

fn work() -> u64 {
    std::thread::sleep(Duration::from_millis(60));
    let mut sum = 0u64;
    for i in 0..1000 {
        sum += i;
    }
    sum
}
"#,
    )
    .unwrap();
}

/// Build the mini project through the CLI and return the binary path.
fn build_instrumented_mini(project_dir: &Path) -> String {
    let takt_bin = env!("CARGO_BIN_EXE_takt");

    // Point the staged build at the local runtime so the test needs no
    // published crate.
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let runtime_path = manifest_dir.join("takt-runtime");

    let output = Command::new(takt_bin)
        .args(["build", "--watch", "main:work", "--project"])
        .arg(project_dir)
        .arg("--runtime-path")
        .arg(&runtime_path)
        .output()
        .expect("failed to run takt build");

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        output.status.success(),
        "takt build failed:\nstderr: {stderr}\nstdout: {stdout}"
    );
    assert!(
        stderr.contains("main:work"),
        "build should report the watched routine, got: {stderr}"
    );

    let binary_path = stdout.trim().to_string();
    assert!(
        Path::new(&binary_path).exists(),
        "built binary should exist at: {binary_path}"
    );
    binary_path
}

#[test]
fn full_pipeline_build_run_report() {
    let tmp = tempfile::tempdir().unwrap();
    let project_dir = tmp.path().join("mini");
    create_mini_project(&project_dir);

    let binary_path = build_instrumented_mini(&project_dir);

    let run_output = Command::new(&binary_path)
        .env("TAKT_PROFILE", "1")
        .output()
        .expect("failed to run instrumented binary");

    assert!(
        run_output.status.success(),
        "instrumented binary failed:\n{}",
        String::from_utf8_lossy(&run_output.stderr)
    );

    // Program behavior is preserved.
    let program_stdout = String::from_utf8_lossy(&run_output.stdout);
    assert!(
        program_stdout.contains("result: 499500"),
        "program should produce correct output, got: {program_stdout}"
    );

    // The report lands on stderr when the session drops.
    let report = String::from_utf8_lossy(&run_output.stderr);
    assert!(
        report.contains("Timings in") && report.contains("main:work"),
        "report header should name the routine, got: {report}"
    );
    assert!(
        report.contains("thread::sleep"),
        "report should show the slow line's source text, got: {report}"
    );
    // The sleep line dominates: at least 60ms must be attributed somewhere.
    assert!(
        report.contains("0.0") || report.contains("0.1"),
        "report should contain formatted durations, got: {report}"
    );
}

#[test]
fn absent_profile_variable_means_no_report() {
    let tmp = tempfile::tempdir().unwrap();
    let project_dir = tmp.path().join("mini");
    create_mini_project(&project_dir);

    let binary_path = build_instrumented_mini(&project_dir);

    let run_output = Command::new(&binary_path)
        .env_remove("TAKT_PROFILE")
        .output()
        .expect("failed to run instrumented binary");

    assert!(run_output.status.success());
    let stderr = String::from_utf8_lossy(&run_output.stderr);
    assert!(
        !stderr.contains("Timings in"),
        "without TAKT_PROFILE the binary must stay silent, got: {stderr}"
    );
}

#[test]
fn unresolvable_selection_fails_build() {
    let tmp = tempfile::tempdir().unwrap();
    let project_dir = tmp.path().join("mini");
    create_mini_project(&project_dir);

    let takt_bin = env!("CARGO_BIN_EXE_takt");
    let output = Command::new(takt_bin)
        .args(["build", "--watch", "main:missing_fn", "--project"])
        .arg(&project_dir)
        .output()
        .expect("failed to run takt build");

    assert!(
        !output.status.success(),
        "build must fail for an unknown function"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("missing_fn"),
        "error should name the function, got: {stderr}"
    );
}
