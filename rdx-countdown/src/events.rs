//! Defines the state and event types produced by a countdown run.
//!
//! `CountdownState` is what consumers see. `Tick` is the internal input to the
//! fold. `RunEvent` is a lifecycle side channel, broadcast as a `RunNotice`
//! tagged with its `RunId` so that tooling can observe starts, freezes and
//! resource release without touching the state stream.

use crate::common::RunId;
use std::time::Duration;

/// An immutable snapshot of a countdown as a consumer should display it.
///
/// `result` is present if and only if `remaining == 0`, and a run produces
/// exactly one such state: its last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountdownState<T> {
    /// The visible counter value.
    pub remaining: u32,
    /// The work's result, revealed only once the counter has reached zero.
    pub result: Option<T>,
}

impl<T> CountdownState<T> {
    /// Returns `true` for the single terminal state `{0, Some(v)}`.
    pub fn is_terminal(&self) -> bool {
        self.remaining == 0 && self.result.is_some()
    }

    /// Returns `true` while the counter sits at zero waiting for the work.
    pub fn is_frozen(&self) -> bool {
        self.remaining == 0 && self.result.is_none()
    }

    /// The display projection: the numeral, or `"Done"` once the result is in.
    pub fn label(&self) -> String {
        match self.result {
            Some(_) => "Done".to_string(),
            None => self.remaining.to_string(),
        }
    }

    /// Consumes the state, yielding the result if this is the terminal state.
    pub fn into_result(self) -> Option<T> {
        self.result
    }
}

/// An input to the countdown fold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick<T> {
    /// The counter timer produced a new value.
    CounterTick(u32),
    /// The background work produced its value.
    WorkDone(T),
}

/// How a run ended, for consumers that ask for an outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome<T> {
    /// The terminal state was delivered with this result.
    Completed(T),
    /// The consumer cancelled before the terminal state.
    Cancelled,
}

/// Lifecycle events of a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// Fired once when the run task begins.
    RunStarted { start: u32, tick_interval: Duration },
    /// Fired when the counter reached zero before the work finished.
    Frozen,
    /// Fired when the counter timer is dropped, on every exit path.
    TimerReleased,
    /// Fired once the terminal state has been delivered.
    RunCompleted,
    /// Fired when the run ends with a failure.
    RunFailed { reason: String },
    /// Fired when the consumer went away before completion.
    RunCancelled,
}

/// A `RunEvent` tagged with the run it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunNotice {
    pub run: RunId,
    pub event: RunEvent,
}
