#![forbid(unsafe_code)]
//! tytest: end-to-end test harness for the tyx compiler
//!
//! A `.tytest` descriptor bundles a tyx sample program, a reference C program and a C
//! checker driver. The harness compiles the sample with `tyx` and the reference with clang,
//! links each against the checker with the LLVM tools, runs both under `lli` and compares
//! their output byte-for-byte.
//!
//! ## Panic Policy
//!
//! - **Production code**: Use `Result` or `Option` with `?` / `ok_or` / `map_err`. The `cli`
//!   module enforces `#![deny(clippy::unwrap_used)]`.
//!
//! - **Test code**: `.unwrap()` and `.expect()` are acceptable in tests.

pub mod cli;
pub mod compare;
pub mod descriptor;
pub mod toolchain;
pub mod version;
pub mod workspace;

pub use cli::test_interfaces::{SystemToolRunner, ToolError, ToolInvocation, ToolOutput, ToolRunner, ToolStatus};
pub use cli::test_runner::{
    ConsoleReporter, RunError, RunnerConfig, TestOutcome, TestReporter, TestRunner, TestSummary, discover_test_files,
};
pub use compare::{Comparison, compare_outputs};
pub use descriptor::{Descriptor, DescriptorError, Field, parse_descriptor, read_descriptor};
pub use toolchain::{ToolchainConfig, locate_compiler};
pub use workspace::{WORKSPACE_MARKER, Workspace, WorkspaceError};
