//! External toolchain configuration and the `tyx` compiler locator

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Base name of the compiler under test.
pub const COMPILER_NAME: &str = "tyx";

/// Environment variable naming the compiler executable directly.
pub const COMPILER_ENV: &str = "TYX_COMPILER";

/// Default search roots for the compiler, tried in order.
pub const DEFAULT_SEARCH_ROOTS: [&str; 2] = ["build", ".."];

/// Names of the LLVM tools and options passed to them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainConfig {
    /// C compiler able to emit LLVM IR (`-S -emit-llvm`)
    pub clang: String,
    /// IR assembler (`.ll` to `.bc`)
    pub llvm_as: String,
    /// Bytecode linker
    pub llvm_link: String,
    /// Bytecode interpreter
    pub lli: String,
    /// Header search paths for the C sources
    pub include_dirs: Vec<PathBuf>,
    /// Per-invocation time limit; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            clang: "clang".to_string(),
            llvm_as: "llvm-as".to_string(),
            llvm_link: "llvm-link".to_string(),
            lli: "lli".to_string(),
            include_dirs: Vec::new(),
            timeout: None,
        }
    }
}

impl ToolchainConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults with tool names overridden from `TYTEST_CLANG`, `TYTEST_LLVM_AS`,
    /// `TYTEST_LLVM_LINK` and `TYTEST_LLI`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like [`ToolchainConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let overrides: [(&str, &mut String); 4] = [
            ("TYTEST_CLANG", &mut config.clang),
            ("TYTEST_LLVM_AS", &mut config.llvm_as),
            ("TYTEST_LLVM_LINK", &mut config.llvm_link),
            ("TYTEST_LLI", &mut config.lli),
        ];
        for (key, slot) in overrides {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *slot = value;
            }
        }
        config
    }

    pub fn with_include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_dirs.push(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// File name of the compiler executable on this platform.
pub fn compiler_file_name() -> String {
    format!("{}{}", COMPILER_NAME, env::consts::EXE_SUFFIX)
}

/// Find the compiler executable.
///
/// An explicit path wins when it names an existing file. Otherwise each search root is walked
/// recursively, in order, and the first match is returned. Hidden directories are skipped and
/// symlinked directories are not followed.
pub fn locate_compiler(explicit: Option<&Path>, search_roots: &[PathBuf]) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        tracing::warn!(path = %path.display(), "configured compiler path is not a file, searching instead");
    }

    let file_name = compiler_file_name();
    search_roots
        .iter()
        .filter(|root| root.is_dir())
        .find_map(|root| find_file(root, &file_name))
}

/// Depth-first search for a regular file named `file_name` below `dir`.
fn find_file(dir: &Path, file_name: &str) -> Option<PathBuf> {
    let mut entries: Vec<_> = fs::read_dir(dir).ok()?.flatten().collect();
    entries.sort_by_key(|e| e.file_name());

    let mut subdirs = Vec::new();
    for entry in entries {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let name = entry.file_name();
        if file_type.is_file() && name == file_name {
            return Some(entry.path());
        }
        if file_type.is_dir() && !name.to_string_lossy().starts_with('.') {
            subdirs.push(entry.path());
        }
    }

    subdirs.iter().find_map(|sub| find_file(sub, file_name))
}
