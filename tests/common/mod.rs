// tests/common/mod.rs
// Shared test utilities for integration tests
#![allow(dead_code)]

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use tempfile::{NamedTempFile, TempDir};

/// Command for the built binary, isolated from the caller's config files and
/// RUST_LOG: working directory and home both point at `home`.
fn streamtask_command(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_streamtask"));
    cmd.current_dir(home)
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env_remove("RUST_LOG");
    cmd
}

fn run_in(home: &Path, args: &[&str], input: &str) -> (String, String, i32) {
    let mut child = streamtask_command(home)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to start streamtask");

    if let Some(mut stdin) = child.stdin.take() {
        // The binary may exit (e.g. on a usage error) before reading stdin
        if let Err(e) = stdin.write_all(input.as_bytes()) {
            assert_eq!(e.kind(), std::io::ErrorKind::BrokenPipe, "Failed to write to stdin");
        }
    }

    let output = child.wait_with_output().expect("Failed to read output");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.code().unwrap_or(-1),
    )
}

/// Run streamtask with the given arguments and input via stdin
pub fn run_streamtask_with_input(args: &[&str], input: &str) -> (String, String, i32) {
    let home = TempDir::new().expect("Failed to create temp dir");
    run_in(home.path(), args, input)
}

/// Run streamtask with a temporary input file appended to the arguments
pub fn run_streamtask_with_file(args: &[&str], file_content: &str) -> (String, String, i32) {
    let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
    temp_file
        .write_all(file_content.as_bytes())
        .expect("Failed to write to temp file");

    let mut full_args = args.to_vec();
    full_args.push(temp_file.path().to_str().unwrap());
    run_streamtask_with_input(&full_args, "")
}

/// Run streamtask from a directory holding a project `.streamtaskrc`
pub fn run_streamtask_with_project_config(
    config: &str,
    args: &[&str],
    input: &str,
) -> (String, String, i32) {
    let home = TempDir::new().expect("Failed to create temp dir");
    std::fs::write(home.path().join(".streamtaskrc"), config).expect("Failed to write config");
    run_in(home.path(), args, input)
}

/// Non-empty stdout lines
pub fn output_lines(stdout: &str) -> Vec<&str> {
    stdout.lines().filter(|line| !line.is_empty()).collect()
}
