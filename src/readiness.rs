//! Readiness checks for the spawned server.
//!
//! The controller blocks here after spawning: polling until the server is
//! judged usable, the process dies early, the startup timeout lapses, or the
//! operation's cancellation token fires. Timed waits never terminate the
//! process themselves.

use std::{
    net::{SocketAddr, TcpStream},
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use crate::{
    cancel::CancelToken,
    error::FixtureError,
    output::BufferedOutput,
    process::ProcessHandle,
    settings::Settings,
};

const CONNECT_TIMEOUT: Duration = Duration::from_millis(200);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How the controller decides the spawned server is usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessPolicy {
    /// Poll until a TCP connection on the native transport port succeeds.
    TransportPort,
    /// Watch the captured output for a marker line.
    OutputMarker(String),
}

/// Result of a readiness wait that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadyOutcome {
    /// The server is usable.
    Ready,
    /// The wait was cancelled before the server became usable.
    Cancelled,
}

/// Blocks until the server is ready, exits, times out, or is cancelled.
pub(crate) fn wait_until_ready(
    process: &mut ProcessHandle,
    settings: &Settings,
    output: &BufferedOutput,
    policy: &ReadinessPolicy,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<ReadyOutcome, FixtureError> {
    let start = Instant::now();
    loop {
        if cancel.is_cancelled() {
            debug!("readiness wait cancelled");
            return Ok(ReadyOutcome::Cancelled);
        }
        if is_ready(policy, settings, output) {
            debug!(elapsed = ?start.elapsed(), "server is ready");
            return Ok(ReadyOutcome::Ready);
        }
        if start.elapsed() >= timeout {
            warn!(?timeout, "server did not become ready before timeout");
            return Err(FixtureError::Readiness {
                reason: format!(
                    "timed out after {timeout:?}; captured output: {}",
                    output_tail(output)
                ),
            });
        }
        match process.wait_timeout(POLL_INTERVAL) {
            Ok(Some(status)) => {
                // Join the drainers so the diagnostic carries every line the
                // dying process managed to write.
                process.wait().ok();
                warn!(%status, "server exited before readiness");
                return Err(FixtureError::Readiness {
                    reason: format!(
                        "process exited with {status} before readiness; captured output: {}",
                        output_tail(output)
                    ),
                });
            }
            Ok(None) => {}
            Err(err) => {
                return Err(FixtureError::Readiness {
                    reason: format!("failed to wait for the server process: {err}"),
                });
            }
        }
    }
}

fn is_ready(policy: &ReadinessPolicy, settings: &Settings, output: &BufferedOutput) -> bool {
    match policy {
        ReadinessPolicy::TransportPort => {
            let addr = SocketAddr::new(settings.address(), settings.port());
            TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).is_ok()
        }
        ReadinessPolicy::OutputMarker(marker) => output.contains(marker),
    }
}

fn output_tail(output: &BufferedOutput) -> String {
    let text = output.to_string();
    let trimmed = text.trim_end();
    if trimmed.is_empty() {
        "<none>".to_owned()
    } else {
        trimmed.to_owned()
    }
}
