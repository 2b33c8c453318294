//! Shared helpers for integration tests.
//!
//! The suites exercise the fixture against small shell scripts standing in
//! for the real server binary, so no Cassandra distribution is needed.

use std::{fs, path::PathBuf};

use tempfile::TempDir;

/// Marker line the fake servers print once they are "ready".
pub const READY_MARKER: &str = "listening for clients";

/// Stages a minimal working directory: a configuration file requesting
/// ephemeral ports and a `bin/` directory for scripts.
///
/// # Panics
///
/// Panics when the temporary directory cannot be prepared.
#[must_use]
pub fn stage_working_dir() -> TempDir {
    let temp = TempDir::new().expect("create staging directory");
    fs::create_dir_all(temp.path().join("conf")).expect("create conf dir");
    fs::create_dir_all(temp.path().join("bin")).expect("create bin dir");
    fs::write(
        temp.path().join("conf").join("cassandra.yaml"),
        "cluster_name: Test Cluster\nnative_transport_port: 0\nstorage_port: 0\nrpc_port: 9160\n",
    )
    .expect("write config");
    temp
}

/// Writes a fake server script into `bin/` and returns the argv to run it.
///
/// # Panics
///
/// Panics when the script cannot be written.
#[must_use]
pub fn fake_server(temp: &TempDir, name: &str, body: &str) -> Vec<String> {
    let path: PathBuf = temp.path().join("bin").join(name);
    fs::write(&path, body).expect("write fake server script");
    vec!["sh".to_owned(), path.display().to_string()]
}

/// A fake server that announces readiness, records each launch, and then
/// idles until terminated.
#[must_use]
pub fn well_behaved_server(temp: &TempDir) -> Vec<String> {
    fake_server(
        temp,
        "server.sh",
        concat!(
            "echo \"launch $$\" >> launches.txt\n",
            "echo $$ > pid.txt\n",
            "echo \"listening for clients\"\n",
            "exec sleep 600\n",
        ),
    )
}

/// A fake server that starts but never announces readiness.
#[must_use]
pub fn never_ready_server(temp: &TempDir) -> Vec<String> {
    fake_server(
        temp,
        "stuck.sh",
        "echo $$ > pid.txt\necho \"still warming up\"\nexec sleep 600\n",
    )
}

/// A fake server that prints a diagnostic and dies immediately.
#[must_use]
pub fn crashing_server(temp: &TempDir) -> Vec<String> {
    fake_server(temp, "crash.sh", "echo \"boom: bad configuration\"\nexit 3\n")
}

/// Returns `true` while a process with `pid` exists.
///
/// # Panics
///
/// Panics when the probe command cannot be spawned.
#[must_use]
pub fn pid_alive(pid: &str) -> bool {
    std::process::Command::new("kill")
        .args(["-0", pid.trim()])
        .status()
        .expect("spawn kill -0")
        .success()
}
