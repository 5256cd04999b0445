//! Error types surfaced by a countdown run.

use thiserror::Error;

/// A terminal failure of a countdown run.
///
/// Cancellation is deliberately absent: a cancelled run ends quietly and is
/// reported as [`RunOutcome::Cancelled`](crate::events::RunOutcome::Cancelled)
/// where an outcome is requested.
#[derive(Debug, Error)]
pub enum CountdownError {
    /// The background work failed. The run stops immediately and no result
    /// state is emitted.
    #[error("background work failed: {0}")]
    Work(#[source] anyhow::Error),
    /// The executor was unavailable or went away before the run finished.
    #[error("scheduler unavailable: {0}")]
    Scheduler(String),
    /// A zero tick interval was requested.
    #[error("tick interval must be greater than zero")]
    InvalidInterval,
}

impl CountdownError {
    /// Returns `true` if the failure came from the work itself.
    pub fn is_work_failure(&self) -> bool {
        matches!(self, CountdownError::Work(_))
    }
}

impl From<tokio::runtime::TryCurrentError> for CountdownError {
    fn from(err: tokio::runtime::TryCurrentError) -> Self {
        CountdownError::Scheduler(err.to_string())
    }
}
