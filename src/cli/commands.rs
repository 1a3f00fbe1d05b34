//! CLI command implementations
//!
//! All command functions return `CliResult<ExitCode>` instead of calling
//! `process::exit`. Error handling and exits happen in the top-level `run()`.

use std::path::Path;

use super::test_interfaces::{SystemToolRunner, ToolRunner};
use super::test_runner::{ConsoleReporter, RunError, RunnerConfig, TestReporter, TestRunner, TestSummary};
use super::{CliError, CliResult, ExitCode};

/// Run the descriptor or descriptor directory at `path` with the real toolchain.
pub fn run_path(path: &Path, config: RunnerConfig, verbose: bool, strict: bool) -> CliResult<ExitCode> {
    let mut runner = TestRunner::new(config, SystemToolRunner, ConsoleReporter::new(verbose));
    run_path_with(&mut runner, path, strict)
}

/// Dispatch on what `path` is: a file runs one test, a directory runs a batch.
///
/// Without `strict` the exit code only reflects fatal errors and invalid arguments, never
/// individual test results.
pub fn run_path_with<R: ToolRunner, P: TestReporter>(
    runner: &mut TestRunner<R, P>,
    path: &Path,
    strict: bool,
) -> CliResult<ExitCode> {
    let summary = if path.is_file() {
        let outcome = runner.run_test_from_file(path).map_err(fatal)?;
        let mut summary = TestSummary::default();
        summary.record(&outcome);
        summary
    } else if path.is_dir() {
        runner.run_test_from_dir(path).map_err(fatal)?
    } else {
        return Err(CliError::failure(format!(
            "[ERROR] Invalid argument (not a file or directory): {}",
            path.display()
        )));
    };

    if strict && !summary.all_passed() {
        // Per-test results are already printed
        return Err(CliError::new("", ExitCode::FAILURE));
    }
    Ok(ExitCode::SUCCESS)
}

fn fatal(e: RunError) -> CliError {
    tracing::error!(error = %e, "aborting test run");
    CliError::failure(format!("[ERROR] {}", e))
}
