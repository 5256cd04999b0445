//! A countdown run observed by several consumers at once.
//!
//! The run is started lazily by the first subscriber and cancelled when the
//! last one detaches before completion. Its work executes at most once, no
//! matter how many subscribers come and go.

use crate::common::SubscriberId;
use crate::components::registry::SubscriberRegistry;
use crate::engine::Countdown;
use crate::error::CountdownError;
use crate::events::CountdownState;
use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// What a shared subscriber receives.
#[derive(Debug, Clone)]
pub enum Notification<T> {
    /// A visible state of the run.
    State(CountdownState<T>),
    /// The run failed. Nothing follows.
    Failed(Arc<CountdownError>),
}

impl<T> Notification<T> {
    /// The display projection: the state's label, or `"Error"`.
    pub fn label(&self) -> String {
        match self {
            Notification::State(state) => state.label(),
            Notification::Failed(_) => "Error".to_string(),
        }
    }
}

/// A lazily started, reference counted countdown run.
pub struct SharedCountdown<T> {
    inner: Arc<SharedRun<T>>,
}

impl<T> Clone for SharedCountdown<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct SharedRun<T> {
    countdown: Countdown,
    state: Mutex<SharedState<T>>,
}

struct SharedState<T> {
    work: Option<BoxFuture<'static, anyhow::Result<T>>>,
    subscribers: SubscriberRegistry<Notification<T>>,
    pump: Option<JoinHandle<()>>,
    closed: bool,
}

impl<T> SharedRun<T> {
    fn lock(&self) -> MutexGuard<'_, SharedState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> SharedCountdown<T>
where
    T: Clone + Send + 'static,
{
    /// Prepares a shared run. Nothing happens until the first subscriber.
    pub fn new<F>(countdown: Countdown, work: F) -> Self
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            inner: Arc::new(SharedRun {
                countdown,
                state: Mutex::new(SharedState {
                    work: Some(work.boxed()),
                    subscribers: SubscriberRegistry::new(),
                    pump: None,
                    closed: false,
                }),
            }),
        }
    }

    /// Attaches a subscriber, starting the run if this is the first one.
    ///
    /// A subscriber only sees states emitted after it attached. Once the run
    /// has finished or been cancelled, new subscribers get an empty stream.
    pub fn subscribe(&self) -> Result<SharedSubscriber<T>, CountdownError> {
        let mut state = self.inner.lock();
        let (id, rx) = state.subscribers.insert();
        if state.closed {
            state.subscribers.remove(id);
        } else if let Some(work) = state.work.take() {
            let started = self
                .inner
                .countdown
                .runtime_handle()
                .and_then(|handle| Ok((handle, self.inner.countdown.start(work)?)));
            match started {
                Ok((handle, states)) => {
                    info!("Shared countdown started by subscriber {:?}.", id);
                    let pump = handle.spawn(pump(Arc::downgrade(&self.inner), states));
                    state.pump = Some(pump);
                }
                Err(err) => {
                    state.closed = true;
                    state.subscribers.close_all();
                    return Err(err);
                }
            }
        }
        Ok(SharedSubscriber {
            id,
            rx,
            run: self.inner.clone(),
        })
    }

    /// The number of attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Returns `true` once the run has finished, failed or been cancelled.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

/// Forwards the run's items to every attached subscriber.
async fn pump<T, S>(run: Weak<SharedRun<T>>, mut states: S)
where
    T: Clone,
    S: Stream<Item = Result<CountdownState<T>, CountdownError>> + Unpin,
{
    while let Some(item) = states.next().await {
        let Some(run) = run.upgrade() else {
            return;
        };
        let notification = match item {
            Ok(state) => Notification::State(state),
            Err(err) => Notification::Failed(Arc::new(err)),
        };
        let reached = run.lock().subscribers.deliver(&notification);
        debug!("Shared notification delivered to {} subscriber(s).", reached);
    }
    if let Some(run) = run.upgrade() {
        let mut state = run.lock();
        state.closed = true;
        state.pump = None;
        state.subscribers.close_all();
    }
}

/// One consumer of a [`SharedCountdown`]. Dropping it detaches the consumer.
pub struct SharedSubscriber<T> {
    id: SubscriberId,
    rx: mpsc::UnboundedReceiver<Notification<T>>,
    run: Arc<SharedRun<T>>,
}

impl<T> SharedSubscriber<T> {
    /// This subscriber's token.
    pub fn id(&self) -> SubscriberId {
        self.id
    }
}

impl<T> Stream for SharedSubscriber<T> {
    type Item = Notification<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl<T> Drop for SharedSubscriber<T> {
    fn drop(&mut self) {
        let mut state = self.run.lock();
        state.subscribers.remove(self.id);
        if state.subscribers.is_empty() && !state.closed {
            if let Some(pump) = state.pump.take() {
                info!("Last subscriber detached; cancelling shared countdown.");
                pump.abort();
                state.closed = true;
            }
        }
    }
}
