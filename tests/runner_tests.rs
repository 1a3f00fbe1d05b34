//! Integration tests for the test runner pipeline
//!
//! The external toolchain is replaced by `ScriptedTools`, which records every
//! invocation and answers with canned output, so these tests need neither tyx
//! nor LLVM.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tytest::cli::commands::run_path_with;
use tytest::cli::{CliError, ExitCode};
use tytest::{
    RunError, RunnerConfig, TestOutcome, TestReporter, TestRunner, ToolError, ToolInvocation, ToolOutput,
    ToolRunner, ToolStatus, ToolchainConfig, WORKSPACE_MARKER,
};

const FIXTURES: &str = "tests/fixtures";

const VALID: &str = r#"<tytest>
    <sample>x = 1;</sample>
    <expected>int x = 1;</expected>
    <checker>int main(void) { return 0; }</checker>
</tytest>"#;

// ============================================================================
// Test doubles
// ============================================================================

/// Toolchain stand-in: every tool succeeds unless named in `fail_with`.
struct ScriptedTools {
    calls: Vec<ToolInvocation>,
    actual_stdout: Vec<u8>,
    expected_stdout: Vec<u8>,
    fail_with: Option<(&'static str, ToolStatus)>,
    /// When set, only the test running in this workspace directory prints `actual_stdout`
    mismatch_in: Option<&'static str>,
}

impl ScriptedTools {
    fn printing(expected: &str, actual: &str) -> Self {
        Self {
            calls: Vec::new(),
            actual_stdout: actual.as_bytes().to_vec(),
            expected_stdout: expected.as_bytes().to_vec(),
            fail_with: None,
            mismatch_in: None,
        }
    }

    fn mismatching_only(mut self, workspace_name: &'static str) -> Self {
        self.mismatch_in = Some(workspace_name);
        self
    }

    fn failing(mut self, tool: &'static str, status: ToolStatus) -> Self {
        self.fail_with = Some((tool, status));
        self
    }

    fn tool_names(&self) -> Vec<String> {
        self.calls.iter().map(|c| c.tool_name()).collect()
    }
}

impl ToolRunner for ScriptedTools {
    fn run(&mut self, invocation: &ToolInvocation) -> Result<ToolOutput, ToolError> {
        self.calls.push(invocation.clone());
        let name = invocation.tool_name();

        let module = invocation.args.first().map(Path::new);
        let runs_actual = module.is_some_and(|m| m.ends_with("actual.bc"))
            && match self.mismatch_in {
                Some(dir) => module.and_then(Path::parent).is_some_and(|p| p.ends_with(dir)),
                None => true,
            };
        let stdout = match name.as_str() {
            "tyx" => b"@x = global i32 1, align 4\n".to_vec(),
            "lli" if runs_actual => self.actual_stdout.clone(),
            "lli" => self.expected_stdout.clone(),
            _ => Vec::new(),
        };

        match self.fail_with {
            Some((tool, status)) if tool == name => Ok(ToolOutput {
                status,
                stdout,
                stderr: format!("{tool}: something went wrong\n").into_bytes(),
            }),
            _ => Ok(ToolOutput {
                status: ToolStatus::Exited(0),
                stdout,
                stderr: Vec::new(),
            }),
        }
    }
}

/// Reporter that remembers what happened instead of printing.
#[derive(Default)]
struct RecordingReporter {
    started: Vec<PathBuf>,
    sources_created: usize,
    completed: Vec<(PathBuf, &'static str, Option<PathBuf>)>,
    discovery: Vec<PathBuf>,
    batches: usize,
}

impl TestReporter for RecordingReporter {
    fn on_discovery_start(&mut self, dir: &Path) {
        self.discovery.push(dir.to_path_buf());
    }

    fn on_test_start(&mut self, path: &Path) {
        self.started.push(path.to_path_buf());
    }

    fn on_sources_created(&mut self, _workspace: &Path) {
        self.sources_created += 1;
    }

    fn on_test_complete(&mut self, path: &Path, outcome: &TestOutcome, retained: Option<&Path>) {
        let kind = match outcome {
            TestOutcome::Passed => "pass",
            TestOutcome::Failed { .. } => "fail",
            TestOutcome::Invalid(_) => "invalid",
            TestOutcome::ToolFailed(_) => "tool",
        };
        self.completed
            .push((path.to_path_buf(), kind, retained.map(Path::to_path_buf)));
    }

    fn on_run_complete(&mut self, _summary: &tytest::TestSummary) {
        self.batches += 1;
    }
}

/// Scratch area with a fake compiler binary and a workspace location.
struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("bin")).unwrap();
        fs::write(dir.path().join("bin").join(tytest::toolchain::compiler_file_name()), "").unwrap();
        Self { dir }
    }

    fn workspace(&self) -> PathBuf {
        self.dir.path().join("tmp")
    }

    /// Directory a test runs in, below the workspace.
    fn test_dir(&self, slot: &str) -> PathBuf {
        self.workspace().join(slot)
    }

    fn config(&self) -> RunnerConfig {
        RunnerConfig::new()
            .with_workspace_dir(self.workspace())
            .with_search_roots(vec![self.dir.path().join("bin")])
    }

    fn write_descriptor(&self, rel: &str, text: &str) -> PathBuf {
        let path = self.dir.path().join("suite").join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, text).unwrap();
        path
    }

    fn runner(&self, tools: ScriptedTools) -> TestRunner<ScriptedTools, RecordingReporter> {
        TestRunner::new(self.config(), tools, RecordingReporter::default())
    }
}

// ============================================================================
// Single descriptor
// ============================================================================

#[test]
fn test_matching_outputs_pass_and_remove_workspace() {
    let sandbox = Sandbox::new();
    let mut runner = sandbox.runner(ScriptedTools::printing("1\n", "1\n"));

    let path = Path::new(FIXTURES).join("tytest").join("assign.tytest");
    let outcome = runner.run_test_from_file(&path).unwrap();

    assert!(matches!(outcome, TestOutcome::Passed));
    assert_eq!(outcome.status_code(), 0);
    assert!(!sandbox.workspace().exists());
    assert_eq!(runner.reporter().completed, vec![(path, "pass", None)]);
}

#[test]
fn test_pipeline_runs_tools_in_order() {
    let sandbox = Sandbox::new();
    let mut runner = sandbox.runner(ScriptedTools::printing("1\n", "1\n"));
    let path = sandbox.write_descriptor("a.tytest", VALID);

    runner.run_test_from_file(&path).unwrap();

    assert_eq!(
        runner.tools().tool_names(),
        vec![
            "clang", "llvm-as", // checker
            "clang", "llvm-as", // expected
            "tyx", "llvm-as", // sample
            "llvm-link", "llvm-link", "lli", "lli",
        ]
    );

    let calls = &runner.tools().calls;
    let ws = sandbox.test_dir("a");
    let args = |i: usize| -> Vec<PathBuf> { calls[i].args.iter().map(PathBuf::from).collect() };
    assert_eq!(
        args(0),
        vec![
            PathBuf::from("-S"),
            PathBuf::from("-emit-llvm"),
            ws.join("checker.c"),
            PathBuf::from("-o"),
            ws.join("checker.ll"),
        ]
    );
    assert_eq!(args(4), vec![ws.join("sample.ty")]);
    assert_eq!(args(5), vec![ws.join("sample.ll"), PathBuf::from("-o"), ws.join("sample.bc")]);
    assert_eq!(
        args(6),
        vec![ws.join("sample.bc"), ws.join("checker.bc"), PathBuf::from("-o"), ws.join("actual.bc")]
    );
    assert_eq!(
        args(7),
        vec![ws.join("expected.bc"), ws.join("checker.bc"), PathBuf::from("-o"), ws.join("reference.bc")]
    );
}

#[test]
fn test_mismatch_fails_and_retains_workspace() {
    let sandbox = Sandbox::new();
    let mut runner = sandbox.runner(ScriptedTools::printing("1\n", "2\n"));
    let path = sandbox.write_descriptor("a.tytest", VALID);

    let outcome = runner.run_test_from_file(&path).unwrap();

    let TestOutcome::Failed { diff } = &outcome else {
        panic!("expected a failed comparison, got {outcome:?}");
    };
    assert_eq!(diff, "-   1 | 1\n+   1 | 2\n");
    assert_eq!(outcome.status_code(), 0);

    let ws = sandbox.test_dir("a");
    assert_eq!(fs::read_to_string(ws.join("sample.ty")).unwrap(), "x = 1;");
    assert_eq!(fs::read_to_string(ws.join("sample.ll")).unwrap(), "@x = global i32 1, align 4\n");
    assert_eq!(fs::read(ws.join("actual.out")).unwrap(), b"2\n");
    assert_eq!(fs::read(ws.join("expected.out")).unwrap(), b"1\n");
    assert_eq!(runner.reporter().completed, vec![(path, "fail", Some(ws))]);
}

#[test]
fn test_materialized_sources_match_fields() {
    let sandbox = Sandbox::new();
    // Stop right after materialization by failing the first tool.
    let mut runner = sandbox.runner(ScriptedTools::printing("", "").failing("clang", ToolStatus::Exited(1)));
    let path = sandbox.write_descriptor("a.tytest", VALID);

    runner.run_test_from_file(&path).unwrap();

    let ws = sandbox.test_dir("a");
    let mut names: Vec<String> = fs::read_dir(&ws)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    assert_eq!(names, [WORKSPACE_MARKER, "checker.c", "expected.c", "sample.ty"]);
    assert_eq!(fs::read_to_string(ws.join("expected.c")).unwrap(), "int x = 1;");
    assert_eq!(fs::read_to_string(ws.join("checker.c")).unwrap(), "int main(void) { return 0; }");
}

#[test]
fn test_wrong_root_is_invalid_without_workspace() {
    let sandbox = Sandbox::new();
    let mut runner = sandbox.runner(ScriptedTools::printing("", ""));

    let outcome = runner
        .run_test_from_file(&Path::new(FIXTURES).join("wrong_root.tytest"))
        .unwrap();

    assert!(matches!(outcome, TestOutcome::Invalid(_)));
    assert_eq!(outcome.status_code(), 1);
    assert!(!sandbox.workspace().exists());
    assert!(runner.tools().calls.is_empty());
}

#[test]
fn test_missing_field_aborts_before_any_tool() {
    let sandbox = Sandbox::new();
    let mut runner = sandbox.runner(ScriptedTools::printing("", ""));

    let err = runner
        .run_test_from_file(&Path::new(FIXTURES).join("missing_checker.tytest"))
        .unwrap_err();

    assert!(matches!(err, RunError::Precondition { .. }));
    assert!(err.to_string().ends_with("descriptor has no <checker> element"));
    assert!(runner.tools().calls.is_empty());
    assert_eq!(runner.reporter().sources_created, 0);
}

#[test]
fn test_missing_compiler_aborts() {
    let sandbox = Sandbox::new();
    let empty = tempfile::tempdir().unwrap();
    let config = sandbox.config().with_search_roots(vec![empty.path().to_path_buf()]);
    let mut runner = TestRunner::new(config, ScriptedTools::printing("", ""), RecordingReporter::default());
    let path = sandbox.write_descriptor("a.tytest", VALID);

    let err = runner.run_test_from_file(&path).unwrap_err();

    assert!(matches!(err, RunError::CompilerNotFound { .. }));
    assert!(runner.tools().calls.is_empty());
}

#[test]
fn test_tool_failure_is_not_a_mismatch() {
    let sandbox = Sandbox::new();
    let mut runner = sandbox.runner(ScriptedTools::printing("1\n", "1\n").failing("tyx", ToolStatus::Exited(3)));
    let path = sandbox.write_descriptor("a.tytest", VALID);

    let outcome = runner.run_test_from_file(&path).unwrap();

    let TestOutcome::ToolFailed(err) = &outcome else {
        panic!("expected a tool failure, got {outcome:?}");
    };
    assert_eq!(err.tool(), "tyx");
    assert_eq!(err.to_string(), "tyx exited with exit status 3:\ntyx: something went wrong");
    assert_eq!(outcome.status_code(), 1);
    // Nothing after the failing step runs
    assert_eq!(runner.tools().tool_names().last().map(String::as_str), Some("tyx"));
    assert!(sandbox.test_dir("a").join("sample.ty").exists());
}

#[test]
fn test_program_exit_code_is_not_a_tool_failure() {
    let sandbox = Sandbox::new();
    let mut runner = sandbox.runner(ScriptedTools::printing("1\n", "1\n").failing("lli", ToolStatus::Exited(4)));
    let path = sandbox.write_descriptor("a.tytest", VALID);

    let outcome = runner.run_test_from_file(&path).unwrap();
    assert!(outcome.is_pass());
}

#[test]
fn test_interpreter_killed_by_signal_is_a_tool_failure() {
    let sandbox = Sandbox::new();
    let mut runner = sandbox.runner(ScriptedTools::printing("1\n", "1\n").failing("lli", ToolStatus::Signaled));
    let path = sandbox.write_descriptor("a.tytest", VALID);

    let outcome = runner.run_test_from_file(&path).unwrap();
    assert!(matches!(outcome, TestOutcome::ToolFailed(ToolError::Failed { .. })));
    assert!(sandbox.test_dir("a").exists());
}

#[test]
fn test_include_dirs_and_timeout_reach_invocations() {
    let sandbox = Sandbox::new();
    let toolchain = ToolchainConfig::new()
        .with_include_dir("include")
        .with_timeout(Some(Duration::from_secs(7)));
    let config = sandbox.config().with_toolchain(toolchain);
    let mut runner = TestRunner::new(config, ScriptedTools::printing("", ""), RecordingReporter::default());
    let path = sandbox.write_descriptor("a.tytest", VALID);

    runner.run_test_from_file(&path).unwrap();

    let clang = &runner.tools().calls[0];
    assert_eq!(clang.args[2], "-I");
    assert_eq!(clang.args[3], "include");
    assert!(runner.tools().calls.iter().all(|c| c.timeout == Some(Duration::from_secs(7))));
}

#[test]
fn test_explicit_compiler_is_invoked() {
    let sandbox = Sandbox::new();
    let compiler = sandbox.dir.path().join("bin").join(tytest::toolchain::compiler_file_name());
    let config = sandbox.config().with_search_roots(Vec::new()).with_compiler(&compiler);
    let mut runner = TestRunner::new(config, ScriptedTools::printing("", ""), RecordingReporter::default());
    let path = sandbox.write_descriptor("a.tytest", VALID);

    runner.run_test_from_file(&path).unwrap();

    assert_eq!(PathBuf::from(&runner.tools().calls[4].program), compiler);
}

// ============================================================================
// Directory batches
// ============================================================================

#[test]
fn test_directory_runs_every_descriptor() {
    let sandbox = Sandbox::new();
    sandbox.write_descriptor("a.tytest", VALID);
    sandbox.write_descriptor("deep/er/b.tytest", VALID);
    sandbox.write_descriptor("deep/c.tytest", VALID);
    sandbox.write_descriptor("notes.txt", "not a test");
    sandbox.write_descriptor("deep/d.xml", VALID);

    let suite = sandbox.dir.path().join("suite");
    let mut runner = sandbox.runner(ScriptedTools::printing("1\n", "1\n"));
    let summary = runner.run_test_from_dir(&suite).unwrap();

    assert_eq!(runner.reporter().discovery, vec![suite]);
    assert_eq!(summary.total, 3);
    assert_eq!(summary.passed, 3);
    assert_eq!(runner.reporter().started.len(), 3);
    assert_eq!(runner.reporter().batches, 1);
    // tyx once per test
    assert_eq!(runner.tools().tool_names().iter().filter(|n| *n == "tyx").count(), 3);
}

#[test]
fn test_directory_continues_after_invalid_and_failed() {
    let sandbox = Sandbox::new();
    sandbox.write_descriptor("a.tytest", "<nope/>");
    sandbox.write_descriptor("b.tytest", VALID);

    let mut runner = sandbox.runner(ScriptedTools::printing("1\n", "0\n"));
    let summary = runner.run_test_from_dir(&sandbox.dir.path().join("suite")).unwrap();

    assert_eq!(summary.total, 2);
    assert_eq!(summary.invalid, 1);
    assert_eq!(summary.failed, 1);
}

#[test]
fn test_directory_keeps_failed_workspace_after_later_pass() {
    let sandbox = Sandbox::new();
    let a = sandbox.write_descriptor("a.tytest", VALID);
    let b = sandbox.write_descriptor("b.tytest", VALID);

    let mut runner = sandbox.runner(ScriptedTools::printing("1\n", "2\n").mismatching_only("a"));
    let summary = runner.run_test_from_dir(&sandbox.dir.path().join("suite")).unwrap();

    assert_eq!((summary.failed, summary.passed), (1, 1));
    assert_eq!(
        runner.reporter().completed,
        vec![(a, "fail", Some(sandbox.test_dir("a"))), (b, "pass", None)]
    );
    assert_eq!(fs::read(sandbox.test_dir("a").join("actual.out")).unwrap(), b"2\n");
    assert_eq!(fs::read_to_string(sandbox.test_dir("a").join("sample.ty")).unwrap(), "x = 1;");
    assert!(!sandbox.test_dir("b").exists());
}

#[test]
fn test_directory_failures_keep_separate_workspaces() {
    let sandbox = Sandbox::new();
    sandbox.write_descriptor("a.tytest", VALID);
    sandbox.write_descriptor("deep/c.tytest", VALID);

    let mut runner = sandbox.runner(ScriptedTools::printing("1\n", "2\n"));
    let summary = runner.run_test_from_dir(&sandbox.dir.path().join("suite")).unwrap();

    assert_eq!(summary.failed, 2);
    let retained: Vec<Option<PathBuf>> = runner.reporter().completed.iter().map(|c| c.2.clone()).collect();
    assert_eq!(
        retained,
        vec![Some(sandbox.test_dir("a")), Some(sandbox.test_dir("deep/c"))]
    );
    assert!(sandbox.test_dir("a").join("actual.out").exists());
    assert!(sandbox.test_dir("deep/c").join("actual.out").exists());
}

#[test]
fn test_foreign_workspace_directory_is_not_cleared() {
    let sandbox = Sandbox::new();
    let path = sandbox.write_descriptor("a.tytest", VALID);
    let foreign = sandbox.test_dir("a");
    fs::create_dir_all(&foreign).unwrap();
    fs::write(foreign.join("notes.md"), "keep me").unwrap();

    let mut runner = sandbox.runner(ScriptedTools::printing("1\n", "1\n"));
    let err = runner.run_test_from_file(&path).unwrap_err();

    assert!(matches!(err, RunError::Workspace(_)));
    assert!(runner.tools().calls.is_empty());
    assert_eq!(fs::read_to_string(foreign.join("notes.md")).unwrap(), "keep me");
}

#[test]
fn test_directory_exitfirst_and_filter() {
    let sandbox = Sandbox::new();
    sandbox.write_descriptor("a_loop.tytest", VALID);
    sandbox.write_descriptor("b_loop.tytest", VALID);
    sandbox.write_descriptor("c_call.tytest", VALID);
    let suite = sandbox.dir.path().join("suite");

    let config = sandbox.config().with_stop_on_fail(true);
    let mut runner = TestRunner::new(config, ScriptedTools::printing("1\n", "2\n"), RecordingReporter::default());
    let summary = runner.run_test_from_dir(&suite).unwrap();
    assert_eq!(summary.total, 1);

    let config = sandbox.config().with_filter(Some("loop".to_string()));
    let mut runner = TestRunner::new(config, ScriptedTools::printing("1\n", "1\n"), RecordingReporter::default());
    let summary = runner.run_test_from_dir(&suite).unwrap();
    assert_eq!(summary.total, 2);
    assert!(runner.reporter().started.iter().all(|p| p.to_string_lossy().contains("loop")));
}

#[test]
fn test_directory_aborts_on_fatal_descriptor() {
    let sandbox = Sandbox::new();
    sandbox.write_descriptor("a.tytest", "<tytest><sample>s</sample></tytest>");
    sandbox.write_descriptor("b.tytest", VALID);

    let mut runner = sandbox.runner(ScriptedTools::printing("1\n", "1\n"));
    let err = runner.run_test_from_dir(&sandbox.dir.path().join("suite")).unwrap_err();

    assert!(matches!(err, RunError::Precondition { .. }));
    assert_eq!(runner.reporter().started.len(), 1);
    assert!(runner.tools().calls.is_empty());
}

// ============================================================================
// Top-level dispatch
// ============================================================================

#[test]
fn test_dispatch_rejects_missing_path() {
    let sandbox = Sandbox::new();
    let mut runner = sandbox.runner(ScriptedTools::printing("", ""));

    let missing = sandbox.dir.path().join("nope");
    let err: CliError = run_path_with(&mut runner, &missing, false).unwrap_err();
    assert_eq!(err.exit_code, ExitCode::FAILURE);
    assert!(err.message.starts_with("[ERROR] Invalid argument (not a file or directory): "));
}

#[test]
fn test_dispatch_exit_codes() {
    let sandbox = Sandbox::new();
    let path = sandbox.write_descriptor("a.tytest", VALID);

    let mut runner = sandbox.runner(ScriptedTools::printing("1\n", "2\n"));
    assert_eq!(run_path_with(&mut runner, &path, false).unwrap(), ExitCode::SUCCESS);

    let mut runner = sandbox.runner(ScriptedTools::printing("1\n", "2\n"));
    let err = run_path_with(&mut runner, &sandbox.dir.path().join("suite"), true).unwrap_err();
    assert_eq!(err.exit_code, ExitCode::FAILURE);

    let mut runner = sandbox.runner(ScriptedTools::printing("1\n", "1\n"));
    assert_eq!(run_path_with(&mut runner, &path, true).unwrap(), ExitCode::SUCCESS);
}

#[test]
fn test_dispatch_reports_fatal_errors() {
    let sandbox = Sandbox::new();
    let mut runner = sandbox.runner(ScriptedTools::printing("", ""));

    let err = run_path_with(&mut runner, &Path::new(FIXTURES).join("missing_checker.tytest"), false).unwrap_err();
    assert_eq!(err.exit_code, ExitCode::FAILURE);
    assert!(err.message.starts_with("[ERROR] "));
}
