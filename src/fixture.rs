//! Lifecycle controller for one supervised server instance.
//!
//! Composes the working-directory pipeline, the process supervisor, the
//! readiness wait, and the client seam into an idempotent start/stop state
//! machine. All transitions for one fixture are serialised by a single
//! exclusive lock; the current [`State`] is additionally published through an
//! atomic cell so observers never block on that lock.

use std::{
    collections::BTreeMap,
    net::IpAddr,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::{
    cancel::CancelToken,
    customizer::{
        self, ExecutableFileCustomizer, RandomPortCustomizer, WorkingDirectoryCustomizer,
    },
    error::{BoxError, FixtureError},
    hooks::{ExitHooks, TeardownRegistry},
    output::{BufferedOutput, Output, TraceOutput},
    ports::PortAllocator,
    process::{ProcessHandle, ProcessSpec, RunProcess},
    readiness::{self, ReadinessPolicy, ReadyOutcome},
    session::{Session, SessionFactory},
    settings::Settings,
    state::{State, StateCell},
    version::Version,
    workdir::{StaticWorkingDirectory, WorkingDirectory, WorkingDirectoryInitializer},
};

const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_OUTPUT_CAPACITY: usize = 128 * 1024;
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One controllable instance of the supervised server plus its derived
/// client resources.
///
/// Clones share the same instance. `start` and `stop` are idempotent and may
/// be invoked many times over the fixture's lifetime; concurrent callers
/// serialise on the instance's lifecycle lock.
#[derive(Clone)]
pub struct Fixture {
    inner: Arc<Inner>,
}

struct Inner {
    version: Version,
    address: IpAddr,
    launch_command: Option<Vec<String>>,
    environment: BTreeMap<String, String>,
    initializer: Box<dyn WorkingDirectoryInitializer>,
    customizers: Vec<Box<dyn WorkingDirectoryCustomizer>>,
    readiness: ReadinessPolicy,
    startup_timeout: Duration,
    stop_timeout: Duration,
    output_capacity: usize,
    extra_outputs: Vec<Arc<dyn Output>>,
    session_factory: Option<Box<dyn SessionFactory>>,
    scripts: Vec<String>,
    register_shutdown_hook: bool,
    registry: Box<dyn TeardownRegistry>,
    lifecycle: Mutex<Lifecycle>,
    state: StateCell,
    interrupt: Mutex<Option<CancelToken>>,
}

#[derive(Default)]
struct Lifecycle {
    hook_registered: bool,
    server: Option<ServerHandle>,
    session: Option<Arc<dyn Session>>,
}

struct ServerHandle {
    process: ProcessHandle,
    settings: Settings,
    output: BufferedOutput,
}

enum LaunchOutcome {
    Ready,
    Cancelled,
}

enum StopOutcome {
    Stopped,
    Cancelled,
}

impl Fixture {
    /// Starts configuring a fixture for `version` staged at
    /// `working_directory`.
    pub fn builder(version: Version, working_directory: impl Into<PathBuf>) -> FixtureBuilder {
        FixtureBuilder::new(version, working_directory)
    }

    /// Returns the current lifecycle state without blocking on the lifecycle
    /// lock.
    #[must_use]
    pub fn state(&self) -> State { self.inner.state.get() }

    /// Returns the version this fixture supervises.
    #[must_use]
    pub fn version(&self) -> Version { self.inner.version }

    /// Requests cancellation of the in-flight `start` or `stop`, if any.
    ///
    /// The blocked operation observes the request at its next poll boundary,
    /// runs best-effort teardown, and ends in [`State::StartInterrupted`] or
    /// [`State::StopInterrupted`] without raising an error.
    pub fn interrupt(&self) {
        let slot = self
            .inner
            .interrupt
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = slot.as_ref() {
            token.cancel();
        }
    }

    /// Starts the server, blocking until it is ready.
    ///
    /// A fixture that is already [`State::Started`] returns immediately. The
    /// first call registers the teardown hook (at most once per fixture).
    ///
    /// # Errors
    ///
    /// Returns a [`FixtureError`] kinded by the failing phase: pipeline,
    /// spawn, readiness, or startup scripts. A cancelled start is not an
    /// error; it leaves the fixture in [`State::StartInterrupted`].
    pub fn start(&self) -> Result<(), FixtureError> {
        let mut lifecycle = self.lock_lifecycle();
        if self.inner.state.get().is_running() {
            debug!("fixture is already started");
            return Ok(());
        }
        self.register_hook_once(&mut lifecycle);
        let cancel = self.install_token();
        self.inner.state.set(State::Starting);
        info!(version = %self.inner.version, "starting server fixture");
        match self.launch(&mut lifecycle, &cancel) {
            Ok(LaunchOutcome::Ready) => {
                self.inner.state.set(State::Started);
                info!(version = %self.inner.version, "server fixture started");
                Ok(())
            }
            Ok(LaunchOutcome::Cancelled) => {
                warn!("server launch was interrupted");
                self.teardown_best_effort(&mut lifecycle);
                self.inner.state.set(State::StartInterrupted);
                Ok(())
            }
            Err(err) => {
                self.teardown_best_effort(&mut lifecycle);
                self.inner.state.set(State::StartFailed);
                Err(err)
            }
        }
    }

    /// Stops the server and releases derived resources.
    ///
    /// A fixture that never started, or that is already stopped, returns
    /// immediately. Client resources are released first; each release is
    /// attempted independently and failures are logged, never raised.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::Teardown`] when process termination fails
    /// unexpectedly. A cancelled stop is not an error; it leaves the fixture
    /// in [`State::StopInterrupted`].
    pub fn stop(&self) -> Result<(), FixtureError> {
        let mut lifecycle = self.lock_lifecycle();
        if self.inner.state.get().is_stopped() {
            debug!("fixture is already stopped");
            return Ok(());
        }
        let cancel = self.install_token();
        self.inner.state.set(State::Stopping);
        info!("stopping server fixture");
        self.release_session(&mut lifecycle);
        match self.terminate_server(&mut lifecycle, &cancel) {
            Ok(StopOutcome::Stopped) => {
                self.inner.state.set(State::Stopped);
                info!("server fixture stopped");
                Ok(())
            }
            Ok(StopOutcome::Cancelled) => {
                warn!("server shutdown was interrupted");
                self.inner.state.set(State::StopInterrupted);
                Ok(())
            }
            Err(source) => {
                self.inner.state.set(State::StopFailed);
                Err(FixtureError::Teardown { source })
            }
        }
    }

    /// Returns the settings of the running server.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::NotStarted`] before `start` has produced live
    /// settings.
    pub fn settings(&self) -> Result<Settings, FixtureError> {
        let lifecycle = self.lock_lifecycle();
        lifecycle
            .server
            .as_ref()
            .map(|server| server.settings.clone())
            .ok_or(FixtureError::NotStarted {
                resource: "settings",
            })
    }

    /// Returns the bounded capture of the current launch's output, for test
    /// assertions and diagnostics.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::NotStarted`] before `start` has launched a
    /// process.
    pub fn output(&self) -> Result<BufferedOutput, FixtureError> {
        let lifecycle = self.lock_lifecycle();
        lifecycle
            .server
            .as_ref()
            .map(|server| server.output.clone())
            .ok_or(FixtureError::NotStarted {
                resource: "captured output",
            })
    }

    /// Returns the lazily-created client session, constructing it at most
    /// once per launch.
    ///
    /// The session is owned by the fixture and released during `stop`.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::NotStarted`] before `start` has produced live
    /// settings, [`FixtureError::NoSessionFactory`] when none was configured,
    /// and [`FixtureError::Session`] when the factory fails.
    pub fn session(&self) -> Result<Arc<dyn Session>, FixtureError> {
        let mut lifecycle = self.lock_lifecycle();
        self.session_locked(&mut lifecycle)
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn install_token(&self) -> CancelToken {
        let token = CancelToken::new();
        *self
            .inner
            .interrupt
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        token
    }

    fn register_hook_once(&self, lifecycle: &mut Lifecycle) {
        if !self.inner.register_shutdown_hook || lifecycle.hook_registered {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        self.inner.registry.register(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                let fixture = Fixture { inner };
                fixture.interrupt();
                if let Err(err) = fixture.stop() {
                    warn!(error = %err, "teardown hook failed to stop the fixture");
                }
            }
        }));
        lifecycle.hook_registered = true;
        debug!("registered teardown hook");
    }

    fn launch(
        &self,
        lifecycle: &mut Lifecycle,
        cancel: &CancelToken,
    ) -> Result<LaunchOutcome, FixtureError> {
        let inner = &*self.inner;
        let directory = inner.initializer.init(&inner.version).map_err(|source| {
            FixtureError::Initialization {
                step: "working directory initialisation".to_owned(),
                source,
            }
        })?;
        customizer::apply_all(&inner.customizers, &directory, &inner.version)?;
        if cancel.is_cancelled() {
            return Ok(LaunchOutcome::Cancelled);
        }

        let settings =
            Settings::from_working_directory(&directory, inner.version, inner.address).map_err(
                |source| FixtureError::Initialization {
                    step: "settings".to_owned(),
                    source,
                },
            )?;

        let capture = BufferedOutput::new(inner.output_capacity);
        let spec = self.launch_spec(&directory);
        let command = spec.display();
        let mut run = RunProcess::new(spec);
        run.attach(Arc::new(capture.clone()));
        run.attach(Arc::new(TraceOutput::new("server")));
        for output in &inner.extra_outputs {
            run.attach(Arc::clone(output));
        }

        let process = run
            .run()
            .map_err(|source| FixtureError::Launch { command, source })?;

        let mut server = ServerHandle {
            process,
            settings,
            output: capture,
        };
        let waited = readiness::wait_until_ready(
            &mut server.process,
            &server.settings,
            &server.output,
            &inner.readiness,
            inner.startup_timeout,
            cancel,
        );
        // Publish the handle before interpreting the wait, so teardown can
        // always reach the process.
        lifecycle.server = Some(server);
        match waited? {
            ReadyOutcome::Cancelled => Ok(LaunchOutcome::Cancelled),
            ReadyOutcome::Ready => {
                self.run_scripts(lifecycle)?;
                Ok(LaunchOutcome::Ready)
            }
        }
    }

    fn launch_spec(&self, directory: &WorkingDirectory) -> ProcessSpec {
        let inner = &*self.inner;
        let mut spec = inner.launch_command.clone().map_or_else(
            || {
                ProcessSpec::new(directory.launch_script().display().to_string()).arg("-f")
            },
            ProcessSpec::from_command,
        );
        spec = spec.current_dir(directory.root());
        for (key, value) in &inner.environment {
            spec = spec.env(key, value);
        }
        spec
    }

    fn run_scripts(&self, lifecycle: &mut Lifecycle) -> Result<(), FixtureError> {
        if self.inner.scripts.is_empty() {
            return Ok(());
        }
        let session = self.session_locked(lifecycle)?;
        for script in &self.inner.scripts {
            session
                .execute(script)
                .map_err(|source| FixtureError::Scripts { source })?;
        }
        debug!(count = self.inner.scripts.len(), "executed startup scripts");
        Ok(())
    }

    fn session_locked(
        &self,
        lifecycle: &mut Lifecycle,
    ) -> Result<Arc<dyn Session>, FixtureError> {
        if let Some(session) = &lifecycle.session {
            return Ok(Arc::clone(session));
        }
        let settings = lifecycle
            .server
            .as_ref()
            .map(|server| server.settings.clone())
            .ok_or(FixtureError::NotStarted {
                resource: "session",
            })?;
        let factory = self
            .inner
            .session_factory
            .as_deref()
            .ok_or(FixtureError::NoSessionFactory)?;
        let session: Arc<dyn Session> = Arc::from(
            factory
                .create(&settings)
                .map_err(|source| FixtureError::Session { source })?,
        );
        lifecycle.session = Some(Arc::clone(&session));
        Ok(session)
    }

    fn release_session(&self, lifecycle: &mut Lifecycle) {
        if let Some(session) = lifecycle.session.take() {
            debug!("closing session");
            if let Err(err) = session.close() {
                warn!(error = %err, "failed to close the session; continuing with teardown");
            }
        }
    }

    /// Tears down after a failed or interrupted start. Failures here are
    /// logged and never raised, so they cannot mask the original error.
    fn teardown_best_effort(&self, lifecycle: &mut Lifecycle) {
        self.release_session(lifecycle);
        if let Some(mut server) = lifecycle.server.take() {
            if let Err(err) = server.process.destroy() {
                warn!(error = %err, "failed to terminate the process during teardown");
            }
            match server.process.wait_timeout(self.inner.stop_timeout) {
                Ok(Some(_)) => {
                    server.process.wait().ok();
                }
                Ok(None) => {
                    warn!("process ignored termination during teardown; killing");
                    server.process.kill().ok();
                    server.process.wait().ok();
                }
                Err(err) => {
                    warn!(error = %err, "failed to wait for the terminated process");
                }
            }
        }
    }

    fn terminate_server(
        &self,
        lifecycle: &mut Lifecycle,
        cancel: &CancelToken,
    ) -> Result<StopOutcome, BoxError> {
        let Some(mut server) = lifecycle.server.take() else {
            return Ok(StopOutcome::Stopped);
        };
        let outcome = self.shut_down_process(&mut server, cancel);
        if !matches!(&outcome, Ok(StopOutcome::Stopped)) {
            // Keep the handle so a later stop can finish the job.
            lifecycle.server = Some(server);
        }
        outcome
    }

    fn shut_down_process(
        &self,
        server: &mut ServerHandle,
        cancel: &CancelToken,
    ) -> Result<StopOutcome, BoxError> {
        if server.process.try_wait()?.is_some() {
            debug!("process already exited");
            server.process.wait()?;
            return Ok(StopOutcome::Stopped);
        }
        server.process.destroy()?;
        let deadline = Instant::now() + self.inner.stop_timeout;
        loop {
            if let Some(status) = server.process.try_wait()? {
                debug!(%status, "process exited");
                server.process.wait()?;
                return Ok(StopOutcome::Stopped);
            }
            if Instant::now() >= deadline {
                warn!(timeout = ?self.inner.stop_timeout, "process ignored termination; killing");
                server.process.kill()?;
                server.process.wait()?;
                return Ok(StopOutcome::Stopped);
            }
            if cancel.wait_timeout(STOP_POLL_INTERVAL) {
                return Ok(StopOutcome::Cancelled);
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Last-resort cleanup so a dropped fixture does not leak the child.
        let lifecycle = self
            .lifecycle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(server) = lifecycle.server.as_mut() {
            server.process.destroy().ok();
            server.process.wait().ok();
        }
    }
}

/// Builder for a [`Fixture`].
pub struct FixtureBuilder {
    version: Version,
    address: IpAddr,
    initializer: Box<dyn WorkingDirectoryInitializer>,
    launch_command: Option<Vec<String>>,
    environment: BTreeMap<String, String>,
    customizers: Option<Vec<Box<dyn WorkingDirectoryCustomizer>>>,
    readiness: ReadinessPolicy,
    startup_timeout: Duration,
    stop_timeout: Duration,
    output_capacity: usize,
    extra_outputs: Vec<Arc<dyn Output>>,
    session_factory: Option<Box<dyn SessionFactory>>,
    scripts: Vec<String>,
    register_shutdown_hook: bool,
    registry: Box<dyn TeardownRegistry>,
}

impl FixtureBuilder {
    /// Creates a builder for `version` staged at `working_directory`.
    pub fn new(version: Version, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            version,
            address: PortAllocator::localhost().address(),
            initializer: Box::new(StaticWorkingDirectory::new(working_directory)),
            launch_command: None,
            environment: BTreeMap::new(),
            customizers: None,
            readiness: ReadinessPolicy::TransportPort,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            output_capacity: DEFAULT_OUTPUT_CAPACITY,
            extra_outputs: Vec::new(),
            session_factory: None,
            scripts: Vec::new(),
            register_shutdown_hook: true,
            registry: Box::new(ExitHooks),
        }
    }

    /// Replaces the working-directory initialiser.
    #[must_use]
    pub fn initializer(mut self, initializer: Box<dyn WorkingDirectoryInitializer>) -> Self {
        self.initializer = initializer;
        self
    }

    /// Sets the address the server binds and ports are probed on.
    #[must_use]
    pub fn address(mut self, address: IpAddr) -> Self {
        self.address = address;
        self
    }

    /// Overrides the launch argv (command first). The default runs the
    /// staged `bin/cassandra -f`.
    #[must_use]
    pub fn launch_command(mut self, command: Vec<String>) -> Self {
        self.launch_command = Some(command);
        self
    }

    /// Adds one environment override for the launched process.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Replaces the customizer pipeline. Order is significant and preserved.
    #[must_use]
    pub fn customizers(mut self, customizers: Vec<Box<dyn WorkingDirectoryCustomizer>>) -> Self {
        self.customizers = Some(customizers);
        self
    }

    /// Appends one customizer to the pipeline (after the defaults, unless
    /// the pipeline was replaced).
    #[must_use]
    pub fn add_customizer(mut self, customizer: Box<dyn WorkingDirectoryCustomizer>) -> Self {
        let address = self.address;
        self.customizers
            .get_or_insert_with(|| default_customizers(address))
            .push(customizer);
        self
    }

    /// Sets how readiness is judged.
    #[must_use]
    pub fn readiness(mut self, readiness: ReadinessPolicy) -> Self {
        self.readiness = readiness;
        self
    }

    /// Sets how long `start` waits for readiness.
    #[must_use]
    pub const fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Sets how long `stop` waits before escalating to a kill.
    #[must_use]
    pub const fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Sets the byte capacity of the bounded output capture.
    #[must_use]
    pub const fn output_capacity(mut self, capacity: usize) -> Self {
        self.output_capacity = capacity;
        self
    }

    /// Attaches an additional output sink to every launch.
    #[must_use]
    pub fn attach_output(mut self, output: Arc<dyn Output>) -> Self {
        self.extra_outputs.push(output);
        self
    }

    /// Plugs in the client seam used by [`Fixture::session`] and startup
    /// scripts.
    #[must_use]
    pub fn session_factory(mut self, factory: Box<dyn SessionFactory>) -> Self {
        self.session_factory = Some(factory);
        self
    }

    /// Appends a script executed through the session once the server is
    /// ready.
    #[must_use]
    pub fn script(mut self, script: impl Into<String>) -> Self {
        self.scripts.push(script.into());
        self
    }

    /// Enables or disables teardown-hook registration (enabled by default).
    #[must_use]
    pub const fn register_shutdown_hook(mut self, register: bool) -> Self {
        self.register_shutdown_hook = register;
        self
    }

    /// Replaces the registry the teardown hook is registered with.
    #[must_use]
    pub fn teardown_registry(mut self, registry: Box<dyn TeardownRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Builds the fixture in state [`State::New`].
    #[must_use]
    pub fn build(self) -> Fixture {
        let address = self.address;
        Fixture {
            inner: Arc::new(Inner {
                version: self.version,
                address,
                launch_command: self.launch_command,
                environment: self.environment,
                initializer: self.initializer,
                customizers: self
                    .customizers
                    .unwrap_or_else(|| default_customizers(address)),
                readiness: self.readiness,
                startup_timeout: self.startup_timeout,
                stop_timeout: self.stop_timeout,
                output_capacity: self.output_capacity,
                extra_outputs: self.extra_outputs,
                session_factory: self.session_factory,
                scripts: self.scripts,
                register_shutdown_hook: self.register_shutdown_hook,
                registry: self.registry,
                lifecycle: Mutex::new(Lifecycle::default()),
                state: StateCell::new(State::New),
                interrupt: Mutex::new(None),
            }),
        }
    }
}

fn default_customizers(address: IpAddr) -> Vec<Box<dyn WorkingDirectoryCustomizer>> {
    vec![
        Box::new(ExecutableFileCustomizer),
        Box::new(RandomPortCustomizer::new(address)),
    ]
}
