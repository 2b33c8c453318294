//! Mutation pipeline applied to the staged working directory before launch.
//!
//! Customizers run in registered order; the first failure aborts the pipeline
//! and names the step that failed. Earlier mutations are not rolled back, so
//! a failed pipeline leaves the directory unusable for launch. Every
//! customizer is expected to be idempotent: repeated launches of one staged
//! directory must not compound mutations.

mod executable;
mod random_ports;

pub use executable::ExecutableFileCustomizer;
pub use random_ports::RandomPortCustomizer;
use tracing::debug;

use crate::{
    error::{BoxError, FixtureError},
    version::Version,
    workdir::WorkingDirectory,
};

/// A single mutation step applied to the working directory before launch.
///
/// A customizer may be OS- or version-conditional and silently decline by
/// returning `Ok(())`. Adding a new step never requires touching the
/// pipeline's execution logic.
pub trait WorkingDirectoryCustomizer: Send + Sync {
    /// Short human-readable name used in error reports.
    fn name(&self) -> &'static str;

    /// Applies (or declines) the mutation for `version`.
    ///
    /// # Errors
    ///
    /// Returns any mutation failure; the pipeline aborts and wraps it.
    fn customize(&self, directory: &WorkingDirectory, version: &Version) -> Result<(), BoxError>;
}

/// Runs every customizer in order, aborting on the first failure.
pub(crate) fn apply_all(
    customizers: &[Box<dyn WorkingDirectoryCustomizer>],
    directory: &WorkingDirectory,
    version: &Version,
) -> Result<(), FixtureError> {
    for customizer in customizers {
        debug!(customizer = customizer.name(), "applying customizer");
        customizer
            .customize(directory, version)
            .map_err(|source| FixtureError::Initialization {
                step: customizer.name().to_owned(),
                source,
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::{WorkingDirectoryCustomizer, apply_all};
    use crate::{
        error::{BoxError, FixtureError},
        version::Version,
        workdir::WorkingDirectory,
    };

    struct Touch(&'static str);

    impl WorkingDirectoryCustomizer for Touch {
        fn name(&self) -> &'static str { self.0 }

        fn customize(
            &self,
            directory: &WorkingDirectory,
            _version: &Version,
        ) -> Result<(), BoxError> {
            std::fs::write(directory.root().join(self.0), b"touched")?;
            Ok(())
        }
    }

    struct Fail;

    impl WorkingDirectoryCustomizer for Fail {
        fn name(&self) -> &'static str { "fail" }

        fn customize(
            &self,
            _directory: &WorkingDirectory,
            _version: &Version,
        ) -> Result<(), BoxError> {
            Err("boom".into())
        }
    }

    #[test]
    fn runs_in_registered_order_and_aborts_on_failure() {
        let temp = TempDir::new().unwrap();
        let dir = WorkingDirectory::new(temp.path());
        let customizers: Vec<Box<dyn WorkingDirectoryCustomizer>> =
            vec![Box::new(Touch("first")), Box::new(Fail), Box::new(Touch("last"))];

        let err = apply_all(&customizers, &dir, &Version::new(3, 11, 3)).unwrap_err();
        match err {
            FixtureError::Initialization { step, .. } => assert_eq!(step, "fail"),
            other => panic!("unexpected error kind: {other}"),
        }
        // Earlier mutations stay in place; later customizers never ran.
        assert!(temp.path().join("first").exists());
        assert!(!temp.path().join("last").exists());
    }
}
