//! The countdown combinator: runs work alongside a counter timer and folds
//! both into one coalesced state stream.

use crate::common::RunId;
use crate::components::fold::{CountdownFold, RunPhase};
use crate::config::CountdownConfig;
use crate::error::CountdownError;
use crate::events::{CountdownState, RunEvent, RunNotice, RunOutcome, Tick};
use crate::time::CounterTimer;
use anyhow::anyhow;
use futures::{FutureExt, Stream, StreamExt};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const STATE_BUFFER: usize = 16;
const RUN_EVENT_CAPACITY: usize = 64;

/// A run's output item: a visible state, or the failure that ended the run.
pub type StateResult<T> = Result<CountdownState<T>, CountdownError>;

/// Describes a countdown and starts runs of it.
///
/// A `Countdown` holds no run state of its own and can start any number of
/// independent runs. Each run is a single task that owns its timer, its work
/// and its fold; the task's `select!` loop is the only writer of the fold.
#[derive(Clone)]
pub struct Countdown {
    start: u32,
    tick_interval: Duration,
    runtime: Option<Handle>,
    run_event_sender: broadcast::Sender<RunNotice>,
    next_run: Arc<AtomicU64>,
}

impl Countdown {
    /// Creates a countdown from `start` with a one second cadence.
    pub fn new(start: u32) -> Self {
        let (run_event_sender, _) = broadcast::channel(RUN_EVENT_CAPACITY);
        Self {
            start,
            tick_interval: Duration::from_secs(1),
            runtime: None,
            run_event_sender,
            next_run: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Creates a countdown from the `start` and `tick_interval_ms` settings.
    pub fn from_config(config: &CountdownConfig) -> Self {
        Self::new(config.start).tick_interval(config.tick_interval())
    }

    /// Sets the timer cadence. A zero interval is rejected when a run starts.
    pub fn tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    /// Runs on the given runtime instead of the one current at `start`.
    pub fn on_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Subscribes to the lifecycle events of every run started from this
    /// countdown (or its clones). Subscribe before starting a run.
    ///
    /// Each notice carries the `RunId` of the run it describes, the same id
    /// exposed by [`CountdownStream::run_id`] and [`Subscription::run_id`].
    pub fn subscribe_run_events(&self) -> broadcast::Receiver<RunNotice> {
        self.run_event_sender.subscribe()
    }

    /// Starts a run and returns its state stream.
    ///
    /// The work is polled from the run task and is dropped, mid-flight if
    /// need be, when the stream is cancelled or dropped. A panic inside the
    /// work is caught and reported as a work failure.
    pub fn start<T, F>(&self, work: F) -> Result<CountdownStream<T>, CountdownError>
    where
        T: Send + 'static,
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        if self.tick_interval.is_zero() {
            return Err(CountdownError::InvalidInterval);
        }
        let handle = self.runtime_handle()?;
        let (state_tx, state_rx) = mpsc::channel(STATE_BUFFER);
        let id = RunId(self.next_run.fetch_add(1, Ordering::Relaxed));
        let run = CountdownRun {
            id,
            start: self.start,
            tick_interval: self.tick_interval,
            events: self.run_event_sender.clone(),
        };
        let task = handle.spawn(run.drive(work, state_tx));
        Ok(CountdownStream {
            id,
            rx: state_rx,
            task,
            finished: false,
        })
    }

    /// Starts a run and feeds its states to `on_state` from a spawned task.
    ///
    /// The callback is only invoked while the returned `Subscription` is
    /// active: its token is checked before every call, so a cancelled
    /// subscription never observes another state.
    pub fn subscribe<T, F, C>(&self, work: F, mut on_state: C) -> Result<Subscription<T>, CountdownError>
    where
        T: Send + 'static,
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
        C: FnMut(&CountdownState<T>) + Send + 'static,
    {
        let handle = self.runtime_handle()?;
        let mut states = self.start(work)?;
        let id = states.run_id();
        let active = Arc::new(AtomicBool::new(true));
        let token = active.clone();
        let task = handle.spawn(async move {
            while let Some(item) = states.next().await {
                if !token.load(Ordering::Acquire) {
                    return Ok(RunOutcome::Cancelled);
                }
                let state = match item {
                    Ok(state) => state,
                    Err(err) => return Err(err),
                };
                on_state(&state);
                if let Some(result) = state.into_result() {
                    return Ok(RunOutcome::Completed(result));
                }
            }
            Ok(RunOutcome::Cancelled)
        });
        Ok(Subscription {
            id,
            active,
            task: Some(task),
        })
    }

    pub(crate) fn runtime_handle(&self) -> Result<Handle, CountdownError> {
        match &self.runtime {
            Some(handle) => Ok(handle.clone()),
            None => Ok(Handle::try_current()?),
        }
    }
}

/// The state owned by one run task.
struct CountdownRun {
    id: RunId,
    start: u32,
    tick_interval: Duration,
    events: broadcast::Sender<RunNotice>,
}

impl CountdownRun {
    fn notify(&self, event: RunEvent) {
        self.events.send(RunNotice { run: self.id, event }).ok();
    }

    #[doc(hidden)]
    async fn drive<T, F>(self, work: F, state_tx: mpsc::Sender<StateResult<T>>)
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        info!(
            "Countdown {:?} from {} every {:?} starting.",
            self.id, self.start, self.tick_interval
        );
        self.notify(RunEvent::RunStarted {
            start: self.start,
            tick_interval: self.tick_interval,
        });
        let mut guard = RunGuard {
            id: self.id,
            events: self.events.clone(),
            settled: false,
        };

        let mut timer = CounterTimer::new(self.start, self.tick_interval)
            .with_release_notice(self.id, self.events.clone());
        let mut fold = CountdownFold::new(self.start);
        let work = AssertUnwindSafe(work)
            .catch_unwind()
            .map(|outcome| match outcome {
                Ok(result) => result,
                Err(panic) => Err(anyhow!("work panicked: {}", panic_message(&*panic))),
            });
        tokio::pin!(work);
        let mut work_pending = true;

        loop {
            let tick = tokio::select! {
                Some(value) = timer.next(), if !timer.is_exhausted() => Tick::CounterTick(value),
                outcome = &mut work, if work_pending => {
                    work_pending = false;
                    match outcome {
                        Ok(value) => Tick::WorkDone(value),
                        Err(err) => {
                            warn!("Work failed: {:#}", err);
                            guard.settle(RunEvent::RunFailed {
                                reason: format!("{:#}", err),
                            });
                            state_tx.send(Err(CountdownError::Work(err))).await.ok();
                            return;
                        }
                    }
                }
                else => break,
            };

            let Some(state) = fold.apply(tick) else {
                if fold.has_buffered_result() {
                    debug!("Work finished; result held until the counter reaches zero.");
                }
                continue;
            };
            debug!("Visible state: remaining={}, done={}", state.remaining, state.is_terminal());
            if fold.phase() == RunPhase::Frozen {
                debug!("Counter reached zero before the work; holding.");
                self.notify(RunEvent::Frozen);
            }
            let terminal = state.is_terminal();
            if state_tx.send(Ok(state)).await.is_err() {
                // Receiver gone: the guard reports the cancellation.
                return;
            }
            if terminal {
                info!("Countdown complete.");
                guard.settle(RunEvent::RunCompleted);
                return;
            }
        }

        warn!("Both sources ended without a terminal state.");
        guard.settle(RunEvent::RunFailed {
            reason: "sources ended without a result".to_string(),
        });
        state_tx
            .send(Err(CountdownError::Scheduler(
                "sources ended without a result".to_string(),
            )))
            .await
            .ok();
    }
}

/// Reports how a run ended. Anything that drops the run before it settles,
/// whether an abort, a closed receiver or a runtime shutdown, counts as a
/// cancellation.
struct RunGuard {
    id: RunId,
    events: broadcast::Sender<RunNotice>,
    settled: bool,
}

impl RunGuard {
    fn settle(&mut self, event: RunEvent) {
        self.settled = true;
        self.events.send(RunNotice { run: self.id, event }).ok();
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.settled {
            info!("Countdown {:?} cancelled.", self.id);
            self.events
                .send(RunNotice {
                    run: self.id,
                    event: RunEvent::RunCancelled,
                })
                .ok();
        }
    }
}

/// The output of a single run.
///
/// Yields each visible state in order and ends after the terminal state, or
/// after a single `Err`. Dropping the stream, or calling [`cancel`], aborts the
/// run: the timer is released and the work is dropped.
///
/// [`cancel`]: CountdownStream::cancel
pub struct CountdownStream<T> {
    id: RunId,
    rx: mpsc::Receiver<StateResult<T>>,
    task: JoinHandle<()>,
    finished: bool,
}

impl<T> CountdownStream<T> {
    /// The id this run's lifecycle notices carry.
    pub fn run_id(&self) -> RunId {
        self.id
    }

    /// Cancels the run. No further states are delivered.
    pub fn cancel(self) {
        drop(self);
    }

    /// Returns `true` once the stream has yielded its last item.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl<T> Stream for CountdownStream<T> {
    type Item = StateResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(state))) => {
                this.finished = state.is_terminal();
                Poll::Ready(Some(Ok(state)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.finished = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                // The run task went away without settling.
                this.finished = true;
                Poll::Ready(Some(Err(CountdownError::Scheduler(
                    "run ended before reaching a terminal state".to_string(),
                ))))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for CountdownStream<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A callback consumer of a run, created by [`Countdown::subscribe`].
///
/// Dropping the subscription cancels it.
pub struct Subscription<T> {
    id: RunId,
    active: Arc<AtomicBool>,
    task: Option<JoinHandle<Result<RunOutcome<T>, CountdownError>>>,
}

impl<T> Subscription<T> {
    /// The id this run's lifecycle notices carry.
    pub fn run_id(&self) -> RunId {
        self.id
    }

    /// Revokes the token and aborts the run. The callback is not invoked again.
    pub fn cancel(&self) {
        self.active.store(false, Ordering::Release);
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    /// Returns `true` until the subscription is cancelled.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Waits for the run to end.
    pub async fn join(mut self) -> Result<RunOutcome<T>, CountdownError> {
        let Some(task) = self.task.take() else {
            return Ok(RunOutcome::Cancelled);
        };
        match task.await {
            Ok(outcome) => outcome,
            Err(err) if err.is_cancelled() => Ok(RunOutcome::Cancelled),
            Err(err) => Err(CountdownError::Scheduler(err.to_string())),
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.active.store(false, Ordering::Release);
            task.abort();
        }
    }
}

/// Extracts the message of a caught panic payload.
fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
