//! Error taxonomy for fixture lifecycle operations.
//!
//! Cancellation is deliberately absent: an interrupted start or stop ends in
//! an interrupted [`State`](crate::state::State) and returns `Ok`, because a
//! cancelled wait is not a fault.

use std::io;

use thiserror::Error;

/// Boxed error used at collaborator seams (initialisers, customizers,
/// session factories), where callers plug in arbitrary failure types.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure of a fixture lifecycle operation, kinded by the phase that failed.
#[derive(Debug, Error)]
pub enum FixtureError {
    /// Working-directory staging or a configuration customizer failed before
    /// the server was spawned. `step` names the failing customizer or phase.
    #[error("working directory preparation failed at `{step}`")]
    Initialization {
        /// Customizer or phase that failed.
        step: String,
        /// Underlying cause.
        #[source]
        source: BoxError,
    },

    /// The server binary could not be spawned.
    #[error("failed to launch `{command}`")]
    Launch {
        /// The command line that failed to spawn.
        command: String,
        /// Underlying cause.
        #[source]
        source: io::Error,
    },

    /// The server exited or stalled before announcing readiness.
    #[error("server was not ready: {reason}")]
    Readiness {
        /// What went wrong, including the tail of captured output.
        reason: String,
    },

    /// A client session could not be constructed from live settings.
    #[error("failed to create a session")]
    Session {
        /// Underlying cause.
        #[source]
        source: BoxError,
    },

    /// A post-readiness script failed against the live server.
    #[error("failed to execute startup script")]
    Scripts {
        /// Underlying cause.
        #[source]
        source: BoxError,
    },

    /// Releasing resources or terminating the process failed during `stop`.
    #[error("failed to stop the server")]
    Teardown {
        /// Underlying cause.
        #[source]
        source: BoxError,
    },

    /// A derived resource was requested before `start` produced live
    /// settings.
    #[error("{resource} is not available until the fixture has started")]
    NotStarted {
        /// Name of the missing dependency.
        resource: &'static str,
    },

    /// A session was requested but no session factory was configured.
    #[error("no session factory was configured for this fixture")]
    NoSessionFactory,
}

#[cfg(test)]
mod tests {
    use super::{BoxError, FixtureError};

    #[test]
    fn initialization_names_the_failing_step() {
        let source: BoxError = "disk full".into();
        let err = FixtureError::Initialization {
            step: "random ports".to_owned(),
            source,
        };
        assert!(err.to_string().contains("random ports"));
    }

    #[test]
    fn not_started_names_the_missing_resource() {
        let err = FixtureError::NotStarted {
            resource: "settings",
        };
        assert!(err.to_string().contains("settings"));
    }
}
