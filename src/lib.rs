//! Disposable Apache Cassandra server fixture for integration tests.
//!
//! This crate launches a real Cassandra distribution from a staged working
//! directory, rewrites its configuration with freshly allocated ephemeral
//! ports, supervises the process with bounded output capture, and tears
//! everything down again, so tests can treat a live server as a cheap,
//! leak-free fixture. Downloading the distribution and speaking CQL are
//! collaborator concerns behind narrow traits.

pub mod cancel;
pub mod customizer;
pub mod error;
pub mod fixture;
pub mod hooks;
pub mod output;
pub mod ports;
pub mod process;
pub mod readiness;
pub mod session;
pub mod settings;
pub mod state;
pub mod version;
pub mod workdir;

pub use error::{BoxError, FixtureError};
pub use fixture::{Fixture, FixtureBuilder};
pub use readiness::ReadinessPolicy;
pub use settings::Settings;
pub use state::State;
pub use version::Version;
