//! Test runner implementation
//!
//! Runs `.tytest` descriptors through the compile, assemble, link, run and compare pipeline:
//!
//! 1. parse and validate the descriptor
//! 2. materialize `sample.ty`, `expected.c` and `checker.c` in the workspace
//! 3. locate the `tyx` compiler
//! 4. `checker.c` and `expected.c`: clang to `.ll`, llvm-as to `.bc`
//! 5. `sample.ty`: tyx to `.ll` (captured stdout), llvm-as to `.bc`
//! 6. llvm-link each program with the checker
//! 7. run both linked modules with lli and compare their stdout byte-for-byte
//!
//! ## TestReporter Trait
//!
//! Reporting is separated from execution through the `TestReporter` trait. The
//! console reporter prints the `[OK]`/`[ERROR]`/`[PASS]`/`[FAIL]` status lines;
//! tests use a recording reporter instead.
//!
//! ## I/O Boundaries
//!
//! All subprocesses go through [`ToolRunner`] (see `test_interfaces.rs`), so a
//! scripted toolchain can stand in for LLVM.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use miette::{GraphicalReportHandler, GraphicalTheme};
use thiserror::Error;

use super::test_interfaces::{ToolError, ToolInvocation, ToolOutput, ToolRunner, ToolStatus};
use crate::compare::{Comparison, compare_outputs};
use crate::descriptor::{DESCRIPTOR_EXTENSION, DescriptorError, Field, read_descriptor};
use crate::toolchain::{DEFAULT_SEARCH_ROOTS, ToolchainConfig, locate_compiler};
use crate::workspace::{DEFAULT_WORKSPACE_DIR, Workspace, WorkspaceError};

// ============================================================================
// Configuration
// ============================================================================

/// Settings for one runner session.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Workspace directory; each test works in its own subdirectory
    pub workspace_dir: PathBuf,
    /// Explicit compiler path; skips the search when it names a file
    pub compiler: Option<PathBuf>,
    /// Roots searched recursively for the compiler, in order
    pub search_roots: Vec<PathBuf>,
    /// Only run descriptors whose path contains this keyword
    pub filter: Option<String>,
    /// Stop a batch at the first test that does not pass
    pub stop_on_fail: bool,
    pub toolchain: ToolchainConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from(DEFAULT_WORKSPACE_DIR),
            compiler: None,
            search_roots: DEFAULT_SEARCH_ROOTS.iter().map(PathBuf::from).collect(),
            filter: None,
            stop_on_fail: false,
            toolchain: ToolchainConfig::default(),
        }
    }
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workspace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace_dir = dir.into();
        self
    }

    pub fn with_compiler(mut self, compiler: impl Into<PathBuf>) -> Self {
        self.compiler = Some(compiler.into());
        self
    }

    pub fn with_search_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.search_roots = roots;
        self
    }

    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_stop_on_fail(mut self, stop: bool) -> Self {
        self.stop_on_fail = stop;
        self
    }

    pub fn with_toolchain(mut self, toolchain: ToolchainConfig) -> Self {
        self.toolchain = toolchain;
        self
    }
}

// ============================================================================
// Outcomes and errors
// ============================================================================

/// Result of running a single descriptor
#[derive(Debug)]
pub enum TestOutcome {
    /// Both programs printed the same bytes
    Passed,
    /// Outputs differ; `diff` is the line report
    Failed { diff: String },
    /// The descriptor is not a well-formed `.tytest` document
    Invalid(DescriptorError),
    /// An external tool failed before outputs could be compared
    ToolFailed(ToolError),
}

impl TestOutcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, TestOutcome::Passed)
    }

    /// 0 when the comparison ran (pass or fail), 1 when the test could not be carried out.
    pub fn status_code(&self) -> i32 {
        match self {
            TestOutcome::Passed | TestOutcome::Failed { .. } => 0,
            TestOutcome::Invalid(_) | TestOutcome::ToolFailed(_) => 1,
        }
    }
}

/// Errors that abort the whole run
#[derive(Debug, Error)]
pub enum RunError {
    #[error("{}: {source}", path.display())]
    Precondition {
        path: PathBuf,
        #[source]
        source: DescriptorError,
    },

    #[error("cannot find the tyx compiler (searched: {searched})")]
    CompilerNotFound { searched: String },

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

/// Failure inside the pipeline: a tool problem is reported for the test, a workspace
/// problem aborts the run.
enum StepError {
    Tool(ToolError),
    Fatal(RunError),
}

impl From<ToolError> for StepError {
    fn from(e: ToolError) -> Self {
        StepError::Tool(e)
    }
}

impl From<WorkspaceError> for StepError {
    fn from(e: WorkspaceError) -> Self {
        StepError::Fatal(RunError::Workspace(e))
    }
}

/// Summary of a test run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TestSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub invalid: usize,
    pub tool_failed: usize,
    pub duration: Duration,
}

impl TestSummary {
    pub fn record(&mut self, outcome: &TestOutcome) {
        self.total += 1;
        match outcome {
            TestOutcome::Passed => self.passed += 1,
            TestOutcome::Failed { .. } => self.failed += 1,
            TestOutcome::Invalid(_) => self.invalid += 1,
            TestOutcome::ToolFailed(_) => self.tool_failed += 1,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.passed == self.total
    }
}

// ============================================================================
// Test Reporter Trait
// ============================================================================

/// Trait for reporting test execution progress and results.
pub trait TestReporter {
    /// Called before a directory is walked for descriptors
    fn on_discovery_start(&mut self, _dir: &Path) {}

    /// Called when a descriptor is about to run
    fn on_test_start(&mut self, path: &Path);

    /// Called once the descriptor sources are in the workspace
    fn on_sources_created(&mut self, _workspace: &Path) {}

    /// Called before each external tool invocation
    fn on_tool(&mut self, _invocation: &ToolInvocation) {}

    /// Called when a descriptor finished; `retained` is the kept workspace, if any
    fn on_test_complete(&mut self, path: &Path, outcome: &TestOutcome, retained: Option<&Path>);

    /// Called after a directory batch
    fn on_run_complete(&mut self, _summary: &TestSummary) {}
}

/// Default console reporter
///
/// Writes to stdout unless built with [`ConsoleReporter::with_writer`].
#[derive(Debug)]
pub struct ConsoleReporter<W: Write = io::Stdout> {
    pub verbose: bool,
    out: W,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self::with_writer(verbose, io::stdout())
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn with_writer(verbose: bool, out: W) -> Self {
        Self { verbose, out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, args: fmt::Arguments<'_>) {
        if let Err(e) = self.out.write_fmt(args) {
            tracing::debug!(error = %e, "cannot write test report");
        }
    }

    fn print_descriptor_error(&mut self, err: &DescriptorError) {
        self.emit(format_args!("[ERROR] {}\n", err));
        if self.verbose {
            let mut rendered = String::new();
            let handler = GraphicalReportHandler::new_themed(GraphicalTheme::unicode_nocolor());
            if handler.render_report(&mut rendered, err).is_ok() {
                self.emit(format_args!("{}", rendered));
            }
        }
    }
}

impl<W: Write> TestReporter for ConsoleReporter<W> {
    fn on_discovery_start(&mut self, dir: &Path) {
        self.emit(format_args!("[OK] Enumerating test directory: {}\n", dir.display()));
    }

    fn on_test_start(&mut self, path: &Path) {
        self.emit(format_args!("[OK] Running test file: {}\n", path.display()));
    }

    fn on_sources_created(&mut self, _workspace: &Path) {
        self.emit(format_args!("[OK] Created temporary source files\n"));
    }

    fn on_tool(&mut self, invocation: &ToolInvocation) {
        if self.verbose {
            self.emit(format_args!("[OK] $ {}\n", invocation.command_line()));
        }
    }

    fn on_test_complete(&mut self, path: &Path, outcome: &TestOutcome, retained: Option<&Path>) {
        match outcome {
            TestOutcome::Passed => {
                self.emit(format_args!("[PASS] {}\n", path.display()));
                self.emit(format_args!("[OK] Cleared temporary source files\n"));
            }
            TestOutcome::Failed { diff } => {
                self.emit(format_args!("[FAIL] {}\n", path.display()));
                self.emit(format_args!("--- expected\n+++ actual\n{}", diff));
            }
            TestOutcome::Invalid(err) => self.print_descriptor_error(err),
            TestOutcome::ToolFailed(err) => {
                self.emit(format_args!("[ERROR] {}: {}\n", path.display(), err));
            }
        }
        if let Some(dir) = retained {
            self.emit(format_args!("[OK] Workspace kept for inspection: {}\n", dir.display()));
        }
    }

    fn on_run_complete(&mut self, summary: &TestSummary) {
        let mut parts = vec![format!("{} passed", summary.passed)];
        if summary.failed > 0 {
            parts.push(format!("{} failed", summary.failed));
        }
        if summary.invalid > 0 {
            parts.push(format!("{} invalid", summary.invalid));
        }
        if summary.tool_failed > 0 {
            parts.push(format!("{} tool errors", summary.tool_failed));
        }
        self.emit(format_args!(
            "[OK] {} in {:.2}s\n",
            parts.join(", "),
            summary.duration.as_secs_f64()
        ));
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Runs descriptors one at a time.
pub struct TestRunner<R: ToolRunner, P: TestReporter> {
    config: RunnerConfig,
    tools: R,
    reporter: P,
    /// Located once, on the first test that gets past materialization
    compiler: Option<PathBuf>,
}

impl<R: ToolRunner, P: TestReporter> TestRunner<R, P> {
    pub fn new(config: RunnerConfig, tools: R, reporter: P) -> Self {
        Self {
            config,
            tools,
            reporter,
            compiler: None,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn tools(&self) -> &R {
        &self.tools
    }

    pub fn reporter(&self) -> &P {
        &self.reporter
    }

    /// Run every descriptor below `dir`, recursively.
    pub fn run_test_from_dir(&mut self, dir: &Path) -> Result<TestSummary, RunError> {
        let start = Instant::now();
        self.reporter.on_discovery_start(dir);

        let mut summary = TestSummary::default();
        for path in discover_test_files(dir) {
            if let Some(keyword) = &self.config.filter {
                if !path.to_string_lossy().contains(keyword.as_str()) {
                    continue;
                }
            }

            let outcome = self.run_test(&path, &workspace_slot(&path, Some(dir)))?;
            summary.record(&outcome);
            if self.config.stop_on_fail && !outcome.is_pass() {
                break;
            }
        }

        summary.duration = start.elapsed();
        self.reporter.on_run_complete(&summary);
        Ok(summary)
    }

    /// Run a single descriptor.
    ///
    /// Structural descriptor problems, tool failures and output mismatches are reported and
    /// returned as a [`TestOutcome`]. Missing fields, a missing compiler and workspace I/O
    /// errors abort the run.
    pub fn run_test_from_file(&mut self, path: &Path) -> Result<TestOutcome, RunError> {
        self.run_test(path, &workspace_slot(path, None))
    }

    /// Run one descriptor in `workspace_dir/slot`.
    #[tracing::instrument(skip_all, fields(path = %path.display(), slot = %slot.display()))]
    fn run_test(&mut self, path: &Path, slot: &Path) -> Result<TestOutcome, RunError> {
        self.reporter.on_test_start(path);

        let descriptor = match read_descriptor(path) {
            Ok(d) => d,
            Err(e) if e.is_structural() => {
                let outcome = TestOutcome::Invalid(e);
                self.reporter.on_test_complete(path, &outcome, None);
                return Ok(outcome);
            }
            Err(e) => {
                return Err(RunError::Precondition {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };

        let workspace = Workspace::acquire(&self.config.workspace_dir, slot)?;
        workspace.materialize(&descriptor)?;
        self.reporter.on_sources_created(workspace.root());

        let compiler = self.compiler()?;

        let (outcome, retained) = match self.build_and_compare(&workspace, &compiler) {
            Ok(Comparison::Match) => {
                workspace.release()?;
                (TestOutcome::Passed, None)
            }
            Ok(Comparison::Mismatch { diff }) => (TestOutcome::Failed { diff }, Some(workspace.retain())),
            Err(StepError::Tool(e)) => {
                tracing::debug!(tool = e.tool(), "tool failure");
                (TestOutcome::ToolFailed(e), Some(workspace.retain()))
            }
            Err(StepError::Fatal(e)) => return Err(e),
        };

        self.reporter.on_test_complete(path, &outcome, retained.as_deref());
        Ok(outcome)
    }

    fn compiler(&mut self) -> Result<PathBuf, RunError> {
        if let Some(path) = &self.compiler {
            return Ok(path.clone());
        }

        let found = locate_compiler(self.config.compiler.as_deref(), &self.config.search_roots).ok_or_else(|| {
            RunError::CompilerNotFound {
                searched: self
                    .config
                    .search_roots
                    .iter()
                    .map(|r| r.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            }
        })?;

        tracing::debug!(compiler = %found.display(), "located compiler");
        self.compiler = Some(found.clone());
        Ok(found)
    }

    fn build_and_compare(&mut self, ws: &Workspace, compiler: &Path) -> Result<Comparison, StepError> {
        let checker_bc = self.build_c(ws, Field::Checker)?;
        let expected_bc = self.build_c(ws, Field::Expected)?;
        let sample_bc = self.build_sample(ws, compiler)?;

        let actual_bc = self.link(ws, &sample_bc, &checker_bc, "actual.bc")?;
        let reference_bc = self.link(ws, &expected_bc, &checker_bc, "reference.bc")?;

        let actual = self.execute(&actual_bc)?;
        ws.write("actual.out", &actual)?;
        let expected = self.execute(&reference_bc)?;
        ws.write("expected.out", &expected)?;

        Ok(compare_outputs(&expected, &actual))
    }

    /// C source to bytecode: clang emits textual IR, llvm-as assembles it.
    fn build_c(&mut self, ws: &Workspace, field: Field) -> Result<PathBuf, StepError> {
        let stem = field.tag();
        let ll = ws.path(&format!("{stem}.ll"));

        let mut clang = ToolInvocation::new(&self.config.toolchain.clang).args(["-S", "-emit-llvm"]);
        for dir in &self.config.toolchain.include_dirs {
            clang = clang.arg("-I").arg(dir);
        }
        let clang = clang.arg(ws.source_path(field)).arg("-o").arg(&ll);
        self.run_checked(clang)?;

        self.assemble(ws, &ll, stem)
    }

    /// Sample source to bytecode: the compiler under test prints IR on stdout.
    fn build_sample(&mut self, ws: &Workspace, compiler: &Path) -> Result<PathBuf, StepError> {
        let tyx = ToolInvocation::new(compiler).arg(ws.source_path(Field::Sample));
        let output = self.run_checked(tyx)?;
        let ll = ws.write("sample.ll", &output.stdout)?;

        self.assemble(ws, &ll, Field::Sample.tag())
    }

    fn assemble(&mut self, ws: &Workspace, ll: &Path, stem: &str) -> Result<PathBuf, StepError> {
        let bc = ws.path(&format!("{stem}.bc"));
        let llvm_as = ToolInvocation::new(&self.config.toolchain.llvm_as)
            .arg(ll)
            .arg("-o")
            .arg(&bc);
        self.run_checked(llvm_as)?;
        Ok(bc)
    }

    fn link(&mut self, ws: &Workspace, program: &Path, checker: &Path, out: &str) -> Result<PathBuf, StepError> {
        let linked = ws.path(out);
        let llvm_link = ToolInvocation::new(&self.config.toolchain.llvm_link)
            .arg(program)
            .arg(checker)
            .arg("-o")
            .arg(&linked);
        self.run_checked(llvm_link)?;
        Ok(linked)
    }

    /// Interpret a linked module and return its stdout.
    ///
    /// The program's own exit code is not a tool failure: it is logged and the output is
    /// still compared. Being killed by a signal is.
    fn execute(&mut self, module: &Path) -> Result<Vec<u8>, StepError> {
        let lli = ToolInvocation::new(&self.config.toolchain.lli).arg(module);
        let output = self.run(&lli)?;
        match output.status {
            ToolStatus::Exited(0) => {}
            ToolStatus::Exited(code) => {
                tracing::warn!(module = %module.display(), code, "program exited with non-zero status");
            }
            ToolStatus::Signaled => {
                return Err(StepError::Tool(ToolError::Failed {
                    tool: lli.tool_name(),
                    status: output.status,
                    stderr: output.stderr_lossy(),
                }));
            }
        }
        Ok(output.stdout)
    }

    fn run(&mut self, invocation: &ToolInvocation) -> Result<ToolOutput, ToolError> {
        let invocation = invocation.clone().timeout(self.config.toolchain.timeout);
        self.reporter.on_tool(&invocation);
        tracing::debug!(command = %invocation.command_line(), "running tool");
        self.tools.run(&invocation)
    }

    fn run_checked(&mut self, invocation: ToolInvocation) -> Result<ToolOutput, ToolError> {
        let output = self.run(&invocation)?;
        output.check(&invocation.tool_name())
    }
}

/// Workspace subdirectory for the descriptor at `path`.
///
/// Inside a batch this is the descriptor's path relative to the batch root without its
/// extension (`suite/loops/for.tytest` runs in `<workspace>/loops/for`); a single file runs
/// in `<workspace>/<stem>`.
fn workspace_slot(path: &Path, batch_root: Option<&Path>) -> PathBuf {
    let relative = batch_root
        .and_then(|root| path.strip_prefix(root).ok())
        .filter(|rel| rel.components().all(|c| matches!(c, Component::Normal(_))))
        .map(Path::to_path_buf);
    match relative {
        Some(rel) if rel.file_stem().is_some() => rel.with_extension(""),
        _ => PathBuf::from(path.file_stem().unwrap_or(path.as_os_str())),
    }
}

/// Discover descriptor files below `path`, recursively, in sorted order.
///
/// A file path is returned as-is when it has the descriptor extension. Symlinked
/// directories are not followed.
pub fn discover_test_files(path: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    if path.is_file() {
        if is_descriptor(path) {
            files.push(path.to_path_buf());
        }
    } else if path.is_dir() {
        collect_descriptors(path, &mut files);
    }

    files.sort();
    files
}

fn collect_descriptors(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        tracing::warn!(dir = %dir.display(), "cannot read directory");
        return;
    };
    for entry in entries.flatten() {
        let entry_path = entry.path();
        match entry.file_type() {
            Ok(t) if t.is_dir() => collect_descriptors(&entry_path, files),
            Ok(_) if is_descriptor(&entry_path) => files.push(entry_path),
            _ => {}
        }
    }
}

fn is_descriptor(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(&format!(".{DESCRIPTOR_EXTENSION}")))
}
