//! The countdown fold: merges ticks into the externally visible state.

use crate::events::{CountdownState, Tick};

/// The observable phase of a run, as seen through the fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// The counter is above zero, or no tick has landed yet.
    Counting { remaining: u32 },
    /// The counter reached zero and the work has not reported yet.
    Frozen,
    /// The terminal state has been produced.
    Done,
}

/// A left fold over the merged tick sequence of one run.
///
/// Only the fold mutates the accumulator, one complete step at a time. Each
/// step yields the projected state if, and only if, the visible pair
/// `(remaining, result present)` changed. The seed `{start, None}` is never
/// yielded: nothing is visible until the first counter tick lands, so a work
/// completion that arrives early is buffered silently.
#[derive(Debug)]
pub struct CountdownFold<T> {
    remaining: u32,
    result: Option<T>,
    ticked: bool,
    last_visible: Option<(u32, bool)>,
    done: bool,
}

impl<T> CountdownFold<T> {
    /// Seeds the fold with `{start, None}`.
    pub fn new(start: u32) -> Self {
        Self {
            remaining: start,
            result: None,
            ticked: false,
            last_visible: None,
            done: false,
        }
    }

    /// Applies one tick and returns the new visible state, if it changed.
    ///
    /// Ticks applied after the terminal state are ignored. A second work
    /// completion never replaces the first.
    pub fn apply(&mut self, tick: Tick<T>) -> Option<CountdownState<T>> {
        if self.done {
            return None;
        }
        match tick {
            Tick::CounterTick(value) => {
                self.remaining = value;
                self.ticked = true;
            }
            Tick::WorkDone(value) => {
                if self.result.is_none() {
                    self.result = Some(value);
                }
            }
        }
        if !self.ticked {
            return None;
        }

        let reveal = self.remaining == 0 && self.result.is_some();
        let visible = (self.remaining, reveal);
        if self.last_visible == Some(visible) {
            return None;
        }
        self.last_visible = Some(visible);

        let result = if reveal {
            self.done = true;
            self.result.take()
        } else {
            None
        };
        Some(CountdownState {
            remaining: self.remaining,
            result,
        })
    }

    pub fn phase(&self) -> RunPhase {
        if self.done {
            RunPhase::Done
        } else if self.ticked && self.remaining == 0 {
            RunPhase::Frozen
        } else {
            RunPhase::Counting {
                remaining: self.remaining,
            }
        }
    }

    /// Returns `true` once `{0, Some(v)}` has been produced.
    pub fn is_terminal(&self) -> bool {
        self.done
    }

    /// Returns `true` if the work finished but its value is still hidden.
    pub fn has_buffered_result(&self) -> bool {
        !self.done && self.result.is_some()
    }
}
