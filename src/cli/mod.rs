//! CLI module for the tyx test harness
//!
//! `tytest <PATH>` runs one `.tytest` descriptor, or every descriptor below a
//! directory, against the tyx compiler and the LLVM toolchain.
//!
//! ## Modules
//!
//! - `commands` - Top-level dispatch on the input path
//! - `test_runner` - Descriptor discovery, the build pipeline and reporting
//! - `test_interfaces` - External tool invocation boundary
//!
//! ## Design
//!
//! The CLI uses clap for argument parsing with derive macros.
//! Command functions return `CliResult<T>` instead of calling `process::exit`.
//! Only the top-level `run()` function handles errors and exits.

// Enforce explicit error handling - no panicking in production code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod commands;
pub mod test_interfaces;
pub mod test_runner;

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;

use crate::toolchain::{COMPILER_ENV, DEFAULT_SEARCH_ROOTS, ToolchainConfig};
use crate::version::TYTEST_VERSION;
use crate::workspace::DEFAULT_WORKSPACE_DIR;
use test_runner::RunnerConfig;

// ============================================================================
// CLI Error handling
// ============================================================================

/// Exit code for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const FAILURE: ExitCode = ExitCode(1);
}

/// Error type for CLI operations.
///
/// Contains a user-facing message and an exit code. The CLI entry point
/// catches these errors, prints the message, and exits with the code.
#[derive(Debug)]
pub struct CliError {
    /// User-facing error message (already formatted for display)
    pub message: String,
    /// Exit code to return to the shell
    pub exit_code: ExitCode,
}

impl CliError {
    /// Create a new CLI error with a message and exit code.
    pub fn new(message: impl Into<String>, exit_code: ExitCode) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }

    /// Create a failure error (exit code 1).
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(message, ExitCode::FAILURE)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

// ============================================================================
// Clap CLI definition
// ============================================================================

/// End-to-end test harness for the tyx compiler
#[derive(Parser, Debug)]
#[command(name = "tytest")]
#[command(version = TYTEST_VERSION)]
#[command(about = "Run .tytest descriptors against the tyx compiler and LLVM", long_about = None)]
pub struct Cli {
    /// Test descriptor, or directory searched recursively for *.tytest files
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    /// Print every tool invocation and detailed descriptor errors
    #[arg(short, long)]
    pub verbose: bool,

    /// Stop on first test that does not pass
    #[arg(short = 'x', long = "exitfirst")]
    pub stop_on_fail: bool,

    /// Only run descriptors whose path contains EXPR
    #[arg(short = 'k', value_name = "EXPR")]
    pub filter: Option<String>,

    /// Exit with status 1 if any test did not pass
    #[arg(long)]
    pub strict: bool,

    /// Workspace directory for sources and build artifacts
    #[arg(long, value_name = "DIR", default_value = DEFAULT_WORKSPACE_DIR)]
    pub workspace: PathBuf,

    /// Path to the tyx executable (default: $TYX_COMPILER, then search)
    #[arg(long, value_name = "FILE")]
    pub compiler: Option<PathBuf>,

    /// Directory searched recursively for tyx; repeatable (default: build, ..)
    #[arg(long = "search-root", value_name = "DIR")]
    pub search_roots: Vec<PathBuf>,

    /// Header search path for the C sources; repeatable
    #[arg(short = 'I', long = "include", value_name = "DIR")]
    pub include_dirs: Vec<PathBuf>,

    /// Kill any tool running longer than SECS seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

impl Cli {
    /// Build the runner configuration, filling gaps from the environment.
    pub fn runner_config(&self) -> RunnerConfig {
        self.runner_config_with(|key| env::var(key).ok())
    }

    /// Like [`Cli::runner_config`], reading variables through `lookup`.
    pub fn runner_config_with(&self, lookup: impl Fn(&str) -> Option<String>) -> RunnerConfig {
        let mut toolchain =
            ToolchainConfig::from_lookup(&lookup).with_timeout(self.timeout.map(Duration::from_secs));
        for dir in &self.include_dirs {
            toolchain = toolchain.with_include_dir(dir);
        }

        let search_roots = if self.search_roots.is_empty() {
            DEFAULT_SEARCH_ROOTS.iter().map(PathBuf::from).collect()
        } else {
            self.search_roots.clone()
        };

        let mut config = RunnerConfig::new()
            .with_workspace_dir(&self.workspace)
            .with_search_roots(search_roots)
            .with_filter(self.filter.clone())
            .with_stop_on_fail(self.stop_on_fail)
            .with_toolchain(toolchain);
        if let Some(compiler) = self.compiler.clone().or_else(|| lookup(COMPILER_ENV).map(PathBuf::from)) {
            config = config.with_compiler(compiler);
        }
        config
    }
}

// ============================================================================
// CLI entry point
// ============================================================================

/// Main CLI entry point.
///
/// This is the only place where `process::exit` is called. All command
/// implementations return `CliResult` and errors are handled here.
pub fn run() {
    let cli = Cli::parse();

    match execute(cli) {
        Ok(exit_code) => {
            if exit_code.0 != 0 {
                process::exit(exit_code.0);
            }
        }
        Err(e) => {
            if !e.message.is_empty() {
                eprintln!("{}", e.message);
            }
            process::exit(e.exit_code.0);
        }
    }
}

/// Execute the CLI command and return result.
fn execute(cli: Cli) -> CliResult<ExitCode> {
    let config = cli.runner_config();
    commands::run_path(&cli.path, config, cli.verbose, cli.strict)
}

// ============================================================================
// Tests
// ============================================================================
