//! External tool boundary
//!
//! Every subprocess the runner starts (the compiler under test, clang, llvm-as, llvm-link, lli)
//! goes through the [`ToolRunner`] trait. This keeps exit-status checking in one place and lets
//! tests substitute a scripted toolchain for the real one.

use std::ffi::OsString;
use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

/// How long to sleep between exit polls while a timeout is armed.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Errors from running an external tool
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to start {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {status}{}", stderr_suffix(.stderr))]
    Failed { tool: String, status: ToolStatus, stderr: String },

    #[error("{tool} timed out after {}s", .after.as_secs_f64())]
    TimedOut { tool: String, after: Duration },
}

impl ToolError {
    /// Name of the tool that failed.
    pub fn tool(&self) -> &str {
        match self {
            ToolError::Spawn { tool, .. } | ToolError::Failed { tool, .. } | ToolError::TimedOut { tool, .. } => tool,
        }
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim_end();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(":\n{}", trimmed)
    }
}

/// How a tool process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    Exited(i32),
    /// Terminated without an exit code (killed by a signal)
    Signaled,
}

impl ToolStatus {
    pub fn success(self) -> bool {
        self == ToolStatus::Exited(0)
    }

    fn from_exit_status(status: ExitStatus) -> Self {
        status.code().map_or(ToolStatus::Signaled, ToolStatus::Exited)
    }
}

impl fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolStatus::Exited(code) => write!(f, "exit status {}", code),
            ToolStatus::Signaled => f.write_str("a signal"),
        }
    }
}

/// One tool invocation: program plus arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: OsString,
    pub args: Vec<OsString>,
    /// Working directory; `None` inherits the runner's
    pub current_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl ToolInvocation {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Display name used in messages (the program's file name).
    pub fn tool_name(&self) -> String {
        PathBuf::from(&self.program)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// The full command line, for verbose output.
    pub fn command_line(&self) -> String {
        std::iter::once(&self.program)
            .chain(&self.args)
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub status: ToolStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    /// Turn a non-successful exit into [`ToolError::Failed`].
    pub fn check(self, tool: &str) -> Result<ToolOutput, ToolError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ToolError::Failed {
                tool: tool.to_string(),
                status: self.status,
                stderr: self.stderr_lossy(),
            })
        }
    }
}

/// Runs external tools to completion.
///
/// Implementations only report spawn failures and timeouts as errors; a tool that ran and
/// exited unsuccessfully still yields `Ok(ToolOutput)` so the caller decides what the exit
/// status means.
pub trait ToolRunner {
    fn run(&mut self, invocation: &ToolInvocation) -> Result<ToolOutput, ToolError>;
}

/// Runs tools as real subprocesses (current behavior).
#[derive(Debug, Default)]
pub struct SystemToolRunner;

impl ToolRunner for SystemToolRunner {
    fn run(&mut self, invocation: &ToolInvocation) -> Result<ToolOutput, ToolError> {
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args);
        if let Some(dir) = &invocation.current_dir {
            command.current_dir(dir);
        }

        let spawn_error = |source: std::io::Error| ToolError::Spawn {
            tool: invocation.tool_name(),
            source,
        };

        let Some(timeout) = invocation.timeout else {
            let output = command.stdin(Stdio::null()).output().map_err(spawn_error)?;
            return Ok(ToolOutput {
                status: ToolStatus::from_exit_status(output.status),
                stdout: output.stdout,
                stderr: output.stderr,
            });
        };

        let child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;
        wait_with_timeout(child, timeout).map_err(|e| match e {
            WaitError::Io(source) => spawn_error(source),
            WaitError::TimedOut => ToolError::TimedOut {
                tool: invocation.tool_name(),
                after: timeout,
            },
        })
    }
}

enum WaitError {
    Io(std::io::Error),
    TimedOut,
}

/// Wait for `child`, killing it once `timeout` has elapsed.
///
/// Both pipes are drained on helper threads so a chatty tool cannot block on a full pipe
/// while we poll for its exit.
fn wait_with_timeout(mut child: Child, timeout: Duration) -> Result<ToolOutput, WaitError> {
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait().map_err(WaitError::Io)? {
            Some(status) => break status,
            None if Instant::now() >= deadline => {
                // The child may exit between try_wait and kill; either way it is reaped below.
                let _ = child.kill();
                let _ = child.wait();
                return Err(WaitError::TimedOut);
            }
            None => thread::sleep(POLL_INTERVAL),
        }
    };

    Ok(ToolOutput {
        status: ToolStatus::from_exit_status(status),
        stdout: join_drain(stdout),
        stderr: join_drain(stderr),
    })
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

fn join_drain(handle: Option<thread::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}
