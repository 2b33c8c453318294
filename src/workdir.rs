//! Staged working directory holding the server distribution for one launch.
//!
//! Staging itself (downloading and extracting an archive) is a collaborator
//! concern behind [`WorkingDirectoryInitializer`]; the core only ever receives
//! a directory path plus the version it was staged for, and mutates it
//! through the customizer pipeline before each launch.

use std::path::{Path, PathBuf};

use crate::{error::BoxError, version::Version};

/// Disposable directory tree holding the server's binaries and configuration
/// for one launch. Owned exclusively by one fixture at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingDirectory {
    root: PathBuf,
}

impl WorkingDirectory {
    /// Wraps an already-staged directory.
    pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }

    /// Returns the directory root.
    #[must_use]
    pub fn root(&self) -> &Path { &self.root }

    /// Returns the directory holding the entry-point binaries.
    #[must_use]
    pub fn bin_dir(&self) -> PathBuf { self.root.join("bin") }

    /// Returns the launch script for the server.
    #[must_use]
    pub fn launch_script(&self) -> PathBuf { self.bin_dir().join("cassandra") }

    /// Returns the structured configuration file mutated before each launch.
    #[must_use]
    pub fn config_file(&self) -> PathBuf { self.root.join("conf").join("cassandra.yaml") }
}

/// Collaborator that stages a working directory for a given version.
///
/// Invoked on every `start`, so an implementation chooses whether a launch
/// reuses one staged tree or gets a fresh copy.
pub trait WorkingDirectoryInitializer: Send + Sync {
    /// Builds (or revalidates) a working directory for `version`.
    ///
    /// # Errors
    ///
    /// Returns any staging failure; the fixture reports it as an
    /// initialisation error.
    fn init(&self, version: &Version) -> Result<WorkingDirectory, BoxError>;
}

/// Initialiser that hands the same pre-staged directory to every launch.
#[derive(Debug, Clone)]
pub struct StaticWorkingDirectory {
    root: PathBuf,
}

impl StaticWorkingDirectory {
    /// Uses `root` as the working directory for every launch.
    pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }
}

impl WorkingDirectoryInitializer for StaticWorkingDirectory {
    fn init(&self, _version: &Version) -> Result<WorkingDirectory, BoxError> {
        if !self.root.is_dir() {
            return Err(format!(
                "working directory {} does not exist",
                self.root.display()
            )
            .into());
        }
        Ok(WorkingDirectory::new(&self.root))
    }
}
