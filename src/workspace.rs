//! Per-test workspace
//!
//! Each test gets its own scratch directory below the configured workspace directory, holding
//! the materialized descriptor sources and every build artifact of that test. It is acquired at
//! the start of a test and then either released (deleted) after a passing comparison or
//! retained for post-mortem inspection.
//!
//! A directory is only ever cleared or deleted when it carries [`WORKSPACE_MARKER`], the file
//! written on acquisition. A non-empty directory without it is refused.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::descriptor::{Descriptor, Field};

/// Default workspace directory, relative to the working directory.
pub const DEFAULT_WORKSPACE_DIR: &str = "tmp";

/// Marks a test directory as created by the harness.
pub const WORKSPACE_MARKER: &str = ".tytest-workspace";

#[derive(Debug, Error)]
#[error("workspace '{}': {action}: {source}", path.display())]
pub struct WorkspaceError {
    pub path: PathBuf,
    pub action: &'static str,
    #[source]
    pub source: io::Error,
}

impl WorkspaceError {
    fn new(path: &Path, action: &'static str, source: io::Error) -> Self {
        Self {
            path: path.to_path_buf(),
            action,
            source,
        }
    }
}

/// File name a descriptor field is materialized under.
pub fn source_file_name(field: Field) -> &'static str {
    match field {
        Field::Sample => "sample.ty",
        Field::Expected => "expected.c",
        Field::Checker => "checker.c",
    }
}

/// An acquired test directory.
///
/// Dropping a `Workspace` leaves the directory in place; deletion only happens through
/// [`Workspace::release`].
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    /// Ancestors that did not exist before acquisition, innermost first
    created: Vec<PathBuf>,
}

impl Workspace {
    /// Create the test directory `base/slot`.
    ///
    /// A directory left behind by an earlier run of the same test is cleared. An existing
    /// non-empty directory without the marker is refused and left untouched.
    pub fn acquire(base: impl AsRef<Path>, slot: impl AsRef<Path>) -> Result<Self, WorkspaceError> {
        let base = base.as_ref();
        let root = base.join(slot.as_ref());

        if root.join(WORKSPACE_MARKER).is_file() {
            tracing::warn!(path = %root.display(), "replacing retained workspace from a previous run");
            fs::remove_dir_all(&root).map_err(|e| WorkspaceError::new(&root, "clearing stale contents", e))?;
        } else if root.is_dir() && !is_empty_dir(&root)? {
            return Err(WorkspaceError::new(
                &root,
                "refusing to clear a directory tytest did not create",
                io::Error::new(io::ErrorKind::AlreadyExists, "directory is not empty"),
            ));
        }

        let created = root
            .ancestors()
            .skip(1)
            .take_while(|dir| dir.starts_with(base) && !dir.as_os_str().is_empty() && !dir.exists())
            .map(Path::to_path_buf)
            .collect();

        fs::create_dir_all(&root).map_err(|e| WorkspaceError::new(&root, "creating directory", e))?;
        let workspace = Self { root, created };
        workspace.write(WORKSPACE_MARKER, b"")?;
        Ok(workspace)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of an artifact inside the workspace.
    pub fn path(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    /// Path of the materialized source file for `field`.
    pub fn source_path(&self, field: Field) -> PathBuf {
        self.path(source_file_name(field))
    }

    /// Write the three descriptor fields as source files.
    pub fn materialize(&self, descriptor: &Descriptor) -> Result<(), WorkspaceError> {
        for field in Field::ALL {
            self.write(source_file_name(field), descriptor.field(field).as_bytes())?;
        }
        Ok(())
    }

    /// Write an artifact (for example captured tool output) into the workspace.
    pub fn write(&self, file_name: &str, contents: &[u8]) -> Result<PathBuf, WorkspaceError> {
        let path = self.path(file_name);
        fs::write(&path, contents).map_err(|e| WorkspaceError::new(&path, "writing file", e))?;
        Ok(path)
    }

    /// Delete the test directory, then every ancestor acquisition created that is now empty.
    pub fn release(self) -> Result<(), WorkspaceError> {
        fs::remove_dir_all(&self.root).map_err(|e| WorkspaceError::new(&self.root, "removing directory", e))?;
        for dir in &self.created {
            // Still holds another test's retained workspace
            if fs::remove_dir(dir).is_err() {
                break;
            }
        }
        Ok(())
    }

    /// Keep the workspace on disk and hand back its location.
    pub fn retain(self) -> PathBuf {
        self.root
    }
}

fn is_empty_dir(dir: &Path) -> Result<bool, WorkspaceError> {
    let mut entries = fs::read_dir(dir).map_err(|e| WorkspaceError::new(dir, "reading directory", e))?;
    Ok(entries.next().is_none())
}
