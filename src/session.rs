//! Client-side seam for talking to the running server.
//!
//! The crate does not ship a CQL protocol client. A caller that wants the
//! fixture to hand out connections or run startup scripts plugs one in
//! through these traits; the fixture owns what the factory creates and
//! releases it first during `stop`.

use crate::{error::BoxError, settings::Settings};

/// A live client connection to the running server.
pub trait Session: Send + Sync + std::fmt::Debug {
    /// Executes one statement or script against the server.
    ///
    /// # Errors
    ///
    /// Returns any execution failure from the underlying client.
    fn execute(&self, statement: &str) -> Result<(), BoxError>;

    /// Releases the connection's resources.
    ///
    /// Invoked by the fixture before the process is terminated; failures are
    /// logged by the caller and never abort the teardown.
    ///
    /// # Errors
    ///
    /// Returns any release failure from the underlying client.
    fn close(&self) -> Result<(), BoxError> { Ok(()) }
}

/// Creates [`Session`]s from the settings of a launched server.
pub trait SessionFactory: Send + Sync {
    /// Builds a session against the live server described by `settings`.
    ///
    /// # Errors
    ///
    /// Returns any connection failure from the underlying client.
    fn create(&self, settings: &Settings) -> Result<Box<dyn Session>, BoxError>;
}
