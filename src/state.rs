//! Lifecycle states of a [`Fixture`](crate::fixture::Fixture).
//!
//! Transitions are total-ordered by the fixture's lifecycle lock; the current
//! value is additionally published through an atomic cell so readers never
//! block on that lock.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of one fixture instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    /// Created, never started.
    New = 0,
    /// A `start` call is in flight.
    Starting = 1,
    /// The server process is running and ready.
    Started = 2,
    /// The last `start` failed; best-effort teardown has run.
    StartFailed = 3,
    /// The last `start` was cancelled mid-flight; best-effort teardown has run.
    StartInterrupted = 4,
    /// A `stop` call is in flight.
    Stopping = 5,
    /// The server process has been stopped and resources released.
    Stopped = 6,
    /// The last `stop` failed partway through teardown.
    StopFailed = 7,
    /// The last `stop` was cancelled while waiting for the process to exit.
    StopInterrupted = 8,
}

impl State {
    /// Returns `true` when the state denotes a successfully running server.
    #[must_use]
    pub const fn is_running(self) -> bool { matches!(self, Self::Started) }

    /// Returns `true` when there is nothing left to stop.
    #[must_use]
    pub const fn is_stopped(self) -> bool { matches!(self, Self::New | Self::Stopped) }

    const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Starting,
            2 => Self::Started,
            3 => Self::StartFailed,
            4 => Self::StartInterrupted,
            5 => Self::Stopping,
            6 => Self::Stopped,
            7 => Self::StopFailed,
            8 => Self::StopInterrupted,
            _ => Self::New,
        }
    }
}

/// Lock-free publication cell for the current [`State`].
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) const fn new(state: State) -> Self { Self(AtomicU8::new(state as u8)) }

    pub(crate) fn get(&self) -> State { State::from_raw(self.0.load(Ordering::Acquire)) }

    pub(crate) fn set(&self, state: State) { self.0.store(state as u8, Ordering::Release); }
}

#[cfg(test)]
mod tests {
    use super::{State, StateCell};

    #[test]
    fn raw_round_trip_covers_every_state() {
        let states = [
            State::New,
            State::Starting,
            State::Started,
            State::StartFailed,
            State::StartInterrupted,
            State::Stopping,
            State::Stopped,
            State::StopFailed,
            State::StopInterrupted,
        ];
        let cell = StateCell::new(State::New);
        for state in states {
            cell.set(state);
            assert_eq!(cell.get(), state);
        }
    }

    #[test]
    fn terminal_predicates() {
        assert!(State::Started.is_running());
        assert!(!State::Starting.is_running());
        assert!(State::New.is_stopped());
        assert!(State::Stopped.is_stopped());
        assert!(!State::StartFailed.is_stopped());
    }
}
