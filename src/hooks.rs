//! Teardown hooks run at process exit.
//!
//! The fixture depends only on "register a no-argument callback to run at
//! process exit"; where those callbacks live is a runtime concern behind the
//! [`TeardownRegistry`] trait. The default registry keeps a process-global
//! hook list and installs a single `atexit` handler to drain it.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Mutex, Once, PoisonError},
};

use tracing::warn;

/// A one-shot callback invoked when the hosting process shuts down.
pub type TeardownHook = Box<dyn FnOnce() + Send>;

/// Registry of callbacks run at process exit.
pub trait TeardownRegistry: Send + Sync {
    /// Registers a callback to run once at process exit.
    fn register(&self, hook: TeardownHook);
}

static HOOKS: Mutex<Vec<TeardownHook>> = Mutex::new(Vec::new());
static INSTALL: Once = Once::new();

extern "C" fn run_registered_hooks() {
    let hooks = std::mem::take(
        &mut *HOOKS.lock().unwrap_or_else(PoisonError::into_inner),
    );
    for hook in hooks {
        // A hook must never take the process down with it.
        if panic::catch_unwind(AssertUnwindSafe(hook)).is_err() {
            warn!("a teardown hook panicked during process exit");
        }
    }
}

/// Default [`TeardownRegistry`] backed by the C runtime's exit handlers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExitHooks;

impl TeardownRegistry for ExitHooks {
    fn register(&self, hook: TeardownHook) {
        INSTALL.call_once(|| {
            // SAFETY: `run_registered_hooks` is a plain extern "C" function
            // with no arguments, the only shape `atexit` accepts.
            let rc = unsafe { nix::libc::atexit(run_registered_hooks) };
            if rc != 0 {
                warn!("failed to install the process exit handler");
            }
        });
        HOOKS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
    }
}
