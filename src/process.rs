//! Supervision of the external server process.
//!
//! Spawns the server binary with its argv, working directory, and environment
//! overrides, drains both standard streams on dedicated background threads so
//! the child can never stall on a full pipe, and exposes blocking, timed, and
//! forced termination primitives for the lifecycle controller to compose.

use std::{
    collections::BTreeMap,
    io::{self, BufRead, BufReader, Read},
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::debug;
use wait_timeout::ChildExt;

use crate::output::Output;

/// Launch description for one external process: argv, optional working
/// directory, and environment overrides.
///
/// Entries absent from the override map inherit the parent process's
/// environment.
#[derive(Debug, Clone, Default)]
pub struct ProcessSpec {
    command: Vec<String>,
    working_directory: Option<PathBuf>,
    environment: BTreeMap<String, String>,
}

impl ProcessSpec {
    /// Creates a spec for `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            command: vec![program.into()],
            working_directory: None,
            environment: BTreeMap::new(),
        }
    }

    /// Creates a spec from a full argv, command first.
    #[must_use]
    pub fn from_command(command: Vec<String>) -> Self {
        Self {
            command,
            working_directory: None,
            environment: BTreeMap::new(),
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.command.push(arg.into());
        self
    }

    /// Sets the working directory the child runs in.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Adds one environment override.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Returns the argv rendered for logs and error messages.
    #[must_use]
    pub fn display(&self) -> String { self.command.join(" ") }

    /// Returns the configured working directory, if any.
    #[must_use]
    pub fn working_directory(&self) -> Option<&Path> { self.working_directory.as_deref() }

    fn build(&self) -> io::Result<Command> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(dir) = &self.working_directory {
            cmd.current_dir(dir);
        }
        cmd.envs(&self.environment);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        Ok(cmd)
    }
}

/// Spawner for one external process, fanning its output out to the attached
/// sinks.
pub struct RunProcess {
    spec: ProcessSpec,
    outputs: Vec<Arc<dyn Output>>,
}

impl RunProcess {
    /// Creates a supervisor for `spec` with no sinks attached.
    #[must_use]
    pub fn new(spec: ProcessSpec) -> Self {
        Self {
            spec,
            outputs: Vec::new(),
        }
    }

    /// Attaches a sink; every attached sink receives every drained line.
    pub fn attach(&mut self, output: Arc<dyn Output>) { self.outputs.push(output); }

    /// Spawns the process and returns a live handle without waiting.
    ///
    /// Both standard streams are drained by background threads for the
    /// lifetime of the child, so spawning never deadlocks on an unread pipe.
    ///
    /// # Errors
    ///
    /// Fails fast when the executable cannot be spawned (missing binary,
    /// permission denied, empty argv).
    pub fn run(&self) -> io::Result<ProcessHandle> {
        let mut child = self.spec.build()?.spawn()?;
        debug!(command = %self.spec.display(), pid = child.id(), "spawned process");

        let mut drainers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            drainers.push(drain(stdout, self.outputs.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            drainers.push(drain(stderr, self.outputs.clone()));
        }
        Ok(ProcessHandle {
            child,
            drainers,
            command: self.spec.display(),
        })
    }

    /// Spawns the process and blocks until it exits, returning the exit
    /// status.
    ///
    /// The drainer threads are joined before returning, so no output is lost
    /// to an unread buffer. A non-zero status is not an error at this layer.
    ///
    /// # Errors
    ///
    /// Returns spawn or wait failures; exit codes are left to the caller.
    pub fn run_and_wait(&self) -> io::Result<ExitStatus> {
        let mut handle = self.run()?;
        handle.wait()
    }
}

fn drain<R>(stream: R, outputs: Vec<Arc<dyn Output>>) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.lines().map_while(Result::ok) {
            for output in &outputs {
                output.accept(&line);
            }
        }
    })
}

/// A spawned external process together with its drainer threads.
///
/// The handle owns the child exclusively until it has been waited on or
/// destroyed, then it is discarded.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    drainers: Vec<JoinHandle<()>>,
    command: String,
}

impl ProcessHandle {
    /// Returns the OS process identifier.
    #[must_use]
    pub fn id(&self) -> u32 { self.child.id() }

    /// Returns the command line this process was launched with.
    #[must_use]
    pub fn command(&self) -> &str { &self.command }

    /// Returns `true` while the process has not been observed to exit.
    pub fn is_alive(&mut self) -> bool { matches!(self.child.try_wait(), Ok(None)) }

    /// Returns the exit status without blocking, if the process has exited.
    ///
    /// # Errors
    ///
    /// Propagates OS failures while querying the child.
    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> { self.child.try_wait() }

    /// Waits up to `timeout` for the process to exit.
    ///
    /// Returns `Some(status)` when it exited within the window and `None`
    /// otherwise. The call never terminates the process and may be repeated.
    ///
    /// # Errors
    ///
    /// Propagates OS failures while waiting.
    pub fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<ExitStatus>> {
        self.child.wait_timeout(timeout)
    }

    /// Blocks until the process exits, joining the drainer threads so every
    /// line of output has been delivered before returning.
    ///
    /// # Errors
    ///
    /// Propagates OS failures while waiting.
    pub fn wait(&mut self) -> io::Result<ExitStatus> {
        let status = self.child.wait()?;
        self.join_drainers();
        Ok(status)
    }

    /// Requests termination with the polite signal.
    ///
    /// Idempotent: an already-exited or already-reaped process is success.
    /// The caller decides how long to wait afterwards and whether to escalate
    /// to [`ProcessHandle::kill`].
    ///
    /// # Errors
    ///
    /// Propagates OS failures other than "no such process".
    pub fn destroy(&mut self) -> io::Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        debug!(pid = self.child.id(), "terminating process");
        self.terminate_gracefully()
    }

    #[cfg(unix)]
    fn terminate_gracefully(&mut self) -> io::Result<()> {
        use nix::{
            errno::Errno,
            sys::signal::{Signal, kill},
            unistd::Pid,
        };

        #[expect(
            clippy::cast_possible_wrap,
            reason = "process IDs won't exceed i32::MAX on supported platforms"
        )]
        let pid = Pid::from_raw(self.child.id() as i32);
        match kill(pid, Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(io::Error::from(errno)),
        }
    }

    #[cfg(not(unix))]
    fn terminate_gracefully(&mut self) -> io::Result<()> { self.kill() }

    /// Forcibly kills the process; the escalation after a graceful
    /// termination window lapses.
    ///
    /// # Errors
    ///
    /// Propagates OS failures; an already-exited process is success.
    pub fn kill(&mut self) -> io::Result<()> {
        match self.child.kill() {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::InvalidInput => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn join_drainers(&mut self) {
        for drainer in self.drainers.drain(..) {
            drainer.join().ok();
        }
    }
}
