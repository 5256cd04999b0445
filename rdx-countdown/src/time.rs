//! The counter timer: the single source of time for a countdown run.

use crate::common::RunId;
use crate::events::{RunEvent, RunNotice};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::trace;

/// Emits `start, start - 1, ..., 0` at a fixed cadence, then completes.
///
/// The first value arrives one `period` after construction, not immediately.
/// Missed ticks are delayed rather than bursted, so consecutive values are
/// always at least a full period apart.
pub struct CounterTimer {
    interval: Interval,
    next_value: Option<u32>,
    release_notice: Option<(RunId, broadcast::Sender<RunNotice>)>,
}

impl CounterTimer {
    /// Creates a timer counting down from `start`.
    ///
    /// `period` must be non-zero; the engine validates this before a run is
    /// created.
    pub fn new(start: u32, period: Duration) -> Self {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval,
            next_value: Some(start),
            release_notice: None,
        }
    }

    /// Announces `RunEvent::TimerReleased` for `run` on `sender` when the timer
    /// is dropped.
    pub(crate) fn with_release_notice(
        mut self,
        run: RunId,
        sender: broadcast::Sender<RunNotice>,
    ) -> Self {
        self.release_notice = Some((run, sender));
        self
    }

    /// Waits for the next counter value. Returns `None` once `0` has been emitted.
    ///
    /// Cancel safe: if the returned future is dropped before it resolves, the
    /// pending value is produced by the next call instead.
    pub async fn next(&mut self) -> Option<u32> {
        let value = self.next_value?;
        self.interval.tick().await;
        self.next_value = value.checked_sub(1);
        trace!("Counter tick: {}", value);
        Some(value)
    }

    /// Returns `true` once the final `0` has been emitted.
    pub fn is_exhausted(&self) -> bool {
        self.next_value.is_none()
    }
}

impl Drop for CounterTimer {
    fn drop(&mut self) {
        trace!("Counter timer released.");
        if let Some((run, sender)) = self.release_notice.take() {
            sender
                .send(RunNotice {
                    run,
                    event: RunEvent::TimerReleased,
                })
                .ok();
        }
    }
}
