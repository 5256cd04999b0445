use countdown::prelude::*;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};

const TICK: Duration = Duration::from_secs(1);

/// Collects `(remaining, result, elapsed)` for every state until the stream ends.
async fn collect_timed<T>(
    mut states: CountdownStream<T>,
    started: Instant,
) -> Vec<Result<(u32, Option<T>, Duration), CountdownError>> {
    let mut seen = Vec::new();
    while let Some(item) = states.next().await {
        seen.push(item.map(|state| (state.remaining, state.result, started.elapsed())));
    }
    seen
}

fn after(ticks: u32) -> Duration {
    TICK * ticks
}

/// Sets a flag when dropped; lets tests observe that the work was abandoned.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Collects the lifecycle events of `run` up to and including `last`.
async fn drain_until(
    events: &mut broadcast::Receiver<RunNotice>,
    run: RunId,
    last: RunEvent,
) -> Vec<RunEvent> {
    let mut seen = Vec::new();
    while let Ok(notice) = events.recv().await {
        if notice.run != run {
            continue;
        }
        let done = notice.event == last;
        seen.push(notice.event);
        if done {
            break;
        }
    }
    seen
}

#[tokio::test(start_paused = true)]
async fn instant_work_is_revealed_exactly_at_zero() {
    let started = Instant::now();
    let states = Countdown::new(3)
        .tick_interval(TICK)
        .start(async { anyhow::Ok("result") })
        .unwrap();

    let seen = collect_timed(states, started).await;
    let seen: Vec<_> = seen.into_iter().map(Result::unwrap).collect();
    assert_eq!(
        seen,
        vec![
            (3, None, after(1)),
            (2, None, after(2)),
            (1, None, after(3)),
            (0, Some("result"), after(4)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn slow_work_freezes_the_display_at_zero() {
    let started = Instant::now();
    let countdown = Countdown::new(3).tick_interval(TICK);
    let mut events = countdown.subscribe_run_events();
    let states = countdown
        .start(async {
            sleep(after(5)).await;
            anyhow::Ok(42)
        })
        .unwrap();
    let run = states.run_id();

    let seen: Vec<_> = collect_timed(states, started)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();
    assert_eq!(
        seen,
        vec![
            (3, None, after(1)),
            (2, None, after(2)),
            (1, None, after(3)),
            (0, None, after(4)),
            (0, Some(42), after(5)),
        ]
    );

    let lifecycle = drain_until(&mut events, run, RunEvent::RunCompleted).await;
    assert_eq!(
        lifecycle,
        vec![
            RunEvent::RunStarted {
                start: 3,
                tick_interval: TICK
            },
            RunEvent::Frozen,
            RunEvent::RunCompleted,
        ]
    );
    assert_eq!(
        events.recv().await.ok(),
        Some(RunNotice {
            run,
            event: RunEvent::TimerReleased
        })
    );
}

#[tokio::test(start_paused = true)]
async fn zero_count_with_finished_work_emits_one_state() {
    let started = Instant::now();
    let states = Countdown::new(0)
        .tick_interval(TICK)
        .start(futures::future::ready(anyhow::Ok("ready")))
        .unwrap();

    let seen: Vec<_> = collect_timed(states, started)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();
    assert_eq!(seen, vec![(0, Some("ready"), after(1))]);
}

#[tokio::test(start_paused = true)]
async fn zero_count_waits_for_pending_work() {
    let started = Instant::now();
    let states = Countdown::new(0)
        .tick_interval(TICK)
        .start(async {
            sleep(after(3)).await;
            anyhow::Ok(())
        })
        .unwrap();

    let seen: Vec<_> = collect_timed(states, started)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();
    assert_eq!(seen, vec![(0, None, after(1)), (0, Some(()), after(3))]);
}

#[tokio::test(start_paused = true)]
async fn result_is_hidden_while_counting() {
    let states = Countdown::new(5)
        .tick_interval(Duration::from_millis(10))
        .start(async {
            sleep(Duration::from_millis(25)).await;
            anyhow::Ok("early")
        })
        .unwrap();

    let seen: Vec<CountdownState<&str>> = states.map(Result::unwrap).collect().await;
    let remaining: Vec<u32> = seen.iter().map(|state| state.remaining).collect();
    assert_eq!(remaining, vec![5, 4, 3, 2, 1, 0]);
    assert!(seen
        .iter()
        .filter(|state| state.remaining > 0)
        .all(|state| state.result.is_none()));
    assert_eq!(seen.iter().filter(|state| state.is_terminal()).count(), 1);
    assert!(seen.last().is_some_and(|state| state.is_terminal()));
}

#[tokio::test(start_paused = true)]
async fn work_failure_ends_the_stream_without_a_result() {
    let started = Instant::now();
    let countdown = Countdown::new(3).tick_interval(TICK);
    let mut events = countdown.subscribe_run_events();
    let states = countdown
        .start(async {
            sleep(Duration::from_millis(2500)).await;
            Err::<u8, _>(anyhow::anyhow!("disk on fire"))
        })
        .unwrap();
    let run = states.run_id();

    let seen = collect_timed(states, started).await;
    assert_eq!(seen.len(), 3);
    assert!(matches!(seen[0], Ok((3, None, _))));
    assert!(matches!(seen[1], Ok((2, None, _))));
    match &seen[2] {
        Err(err) => {
            assert!(err.is_work_failure());
            assert!(err.to_string().contains("disk on fire"));
        }
        Ok(state) => panic!("expected a failure, got {:?}", state),
    }

    let lifecycle = drain_until(&mut events, run, RunEvent::TimerReleased).await;
    assert!(lifecycle.contains(&RunEvent::RunFailed {
        reason: "disk on fire".to_string()
    }));
}

#[tokio::test(start_paused = true)]
async fn failure_while_frozen_is_still_a_failure() {
    let states = Countdown::new(1)
        .tick_interval(TICK)
        .start(async {
            sleep(after(4)).await;
            Err::<(), _>(anyhow::anyhow!("too slow and broken"))
        })
        .unwrap();

    let seen: Vec<_> = states.collect().await;
    assert_eq!(seen.len(), 3);
    assert!(matches!(
        seen[1],
        Ok(CountdownState {
            remaining: 0,
            result: None
        })
    ));
    assert!(matches!(seen[2], Err(CountdownError::Work(_))));
}

#[tokio::test(start_paused = true)]
async fn panicking_work_is_a_work_failure_not_a_cancellation() {
    let countdown = Countdown::new(3).tick_interval(TICK);
    let mut events = countdown.subscribe_run_events();
    let states = countdown
        .start(async {
            sleep(Duration::from_millis(1500)).await;
            if true {
                panic!("work blew up");
            }
            anyhow::Ok(())
        })
        .unwrap();
    let run = states.run_id();

    let seen: Vec<_> = states.collect().await;
    assert_eq!(seen.len(), 2);
    assert!(matches!(
        seen[0],
        Ok(CountdownState {
            remaining: 3,
            result: None
        })
    ));
    match &seen[1] {
        Err(err) => {
            assert!(err.is_work_failure());
            assert!(err.to_string().contains("work blew up"));
        }
        Ok(state) => panic!("expected a failure, got {:?}", state),
    }

    let lifecycle = drain_until(&mut events, run, RunEvent::TimerReleased).await;
    assert!(lifecycle.contains(&RunEvent::RunFailed {
        reason: "work panicked: work blew up".to_string()
    }));
    assert!(!lifecycle.contains(&RunEvent::RunCancelled));
}

#[tokio::test(start_paused = true)]
async fn concurrent_runs_are_told_apart_by_run_id() {
    let countdown = Countdown::new(1).tick_interval(TICK);
    let mut events = countdown.subscribe_run_events();
    let fast = countdown.start(async { anyhow::Ok(1) }).unwrap();
    let slow = countdown
        .clone()
        .start(async {
            sleep(after(10)).await;
            anyhow::Ok(2)
        })
        .unwrap();
    assert_ne!(fast.run_id(), slow.run_id());

    let fast_run = fast.run_id();
    let slow_run = slow.run_id();
    let fast_states: Vec<_> = fast.collect().await;
    assert_eq!(fast_states.len(), 2);
    sleep(Duration::from_millis(100)).await;
    slow.cancel();

    let slow_lifecycle = drain_until(&mut events, slow_run, RunEvent::RunCancelled).await;
    assert!(slow_lifecycle.contains(&RunEvent::Frozen));
    assert!(!slow_lifecycle.contains(&RunEvent::RunCompleted));

    let third = countdown.start(async { anyhow::Ok(3) }).unwrap();
    assert!(third.run_id() > slow_run && slow_run > fast_run);
}

#[tokio::test(start_paused = true)]
async fn cancelling_before_the_first_tick_releases_both_sources() {
    let countdown = Countdown::new(3).tick_interval(TICK);
    let mut events = countdown.subscribe_run_events();
    let work_dropped = Arc::new(AtomicBool::new(false));
    let flag = DropFlag(work_dropped.clone());

    let states = countdown
        .start(async move {
            let _flag = flag;
            sleep(after(10)).await;
            anyhow::Ok(())
        })
        .unwrap();
    let run = states.run_id();

    sleep(Duration::from_millis(100)).await;
    assert!(!work_dropped.load(Ordering::SeqCst));
    states.cancel();

    let lifecycle = drain_until(&mut events, run, RunEvent::RunCancelled).await;
    assert_eq!(
        lifecycle,
        vec![
            RunEvent::RunStarted {
                start: 3,
                tick_interval: TICK
            },
            RunEvent::TimerReleased,
            RunEvent::RunCancelled,
        ]
    );
    assert!(work_dropped.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn cancelled_subscription_never_sees_another_state() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let subscription = Countdown::new(5)
        .tick_interval(TICK)
        .subscribe(
            async {
                sleep(after(2)).await;
                anyhow::Ok("never shown")
            },
            move |state: &CountdownState<&str>| sink.lock().unwrap().push(state.remaining),
        )
        .unwrap();

    sleep(Duration::from_millis(2500)).await;
    assert!(subscription.is_active());
    subscription.cancel();
    assert!(!subscription.is_active());
    sleep(after(10)).await;

    assert_eq!(*seen.lock().unwrap(), vec![5, 4]);
    assert_eq!(subscription.join().await.unwrap(), RunOutcome::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn subscription_reports_the_result() {
    let labels = Arc::new(Mutex::new(Vec::new()));
    let sink = labels.clone();
    let subscription = Countdown::new(2)
        .tick_interval(TICK)
        .subscribe(
            async { anyhow::Ok(7u64) },
            move |state: &CountdownState<u64>| sink.lock().unwrap().push(state.label()),
        )
        .unwrap();

    assert_eq!(subscription.join().await.unwrap(), RunOutcome::Completed(7));
    assert_eq!(*labels.lock().unwrap(), vec!["2", "1", "Done"]);
}

#[tokio::test(start_paused = true)]
async fn subscription_surfaces_work_failure() {
    let subscription = Countdown::new(2)
        .tick_interval(TICK)
        .subscribe(
            async { Err::<(), _>(anyhow::anyhow!("nope")) },
            |_: &CountdownState<()>| {},
        )
        .unwrap();

    let err = subscription.join().await.unwrap_err();
    assert!(err.is_work_failure());
}

#[tokio::test(start_paused = true)]
async fn shared_run_executes_work_once_for_all_subscribers() {
    let executions = Arc::new(AtomicUsize::new(0));
    let counter = executions.clone();
    let operation = SharedCountdown::new(Countdown::new(2).tick_interval(TICK), async move {
        counter.fetch_add(1, Ordering::SeqCst);
        anyhow::Ok("shared")
    });

    let first = operation.subscribe().unwrap();
    let second = operation.subscribe().unwrap();
    assert_eq!(operation.subscriber_count(), 2);
    assert_ne!(first.id(), second.id());

    let (a, b): (Vec<_>, Vec<_>) = tokio::join!(
        first.map(|n| n.label()).collect(),
        second.map(|n| n.label()).collect()
    );
    assert_eq!(a, vec!["2", "1", "Done"]);
    assert_eq!(a, b);
    assert_eq!(executions.load(Ordering::SeqCst), 1);
    assert!(operation.is_closed());

    let late: Vec<_> = operation.subscribe().unwrap().collect().await;
    assert!(late.is_empty());
    assert_eq!(executions.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn late_subscriber_only_sees_later_states() {
    let operation = SharedCountdown::new(Countdown::new(3).tick_interval(TICK), async {
        anyhow::Ok(1u8)
    });
    let early = operation.subscribe().unwrap();

    sleep(Duration::from_millis(2500)).await;
    let late = operation.subscribe().unwrap();

    let (early, late): (Vec<_>, Vec<_>) = tokio::join!(
        early.map(|n| n.label()).collect(),
        late.map(|n| n.label()).collect()
    );
    assert_eq!(early, vec!["3", "2", "1", "Done"]);
    assert_eq!(late, vec!["1", "Done"]);
}

#[tokio::test(start_paused = true)]
async fn last_subscriber_leaving_cancels_the_shared_run() {
    let countdown = Countdown::new(5).tick_interval(TICK);
    let mut events = countdown.subscribe_run_events();
    let work_dropped = Arc::new(AtomicBool::new(false));
    let flag = DropFlag(work_dropped.clone());
    let operation = SharedCountdown::new(countdown, async move {
        let _flag = flag;
        sleep(after(60)).await;
        anyhow::Ok(())
    });

    let mut first = operation.subscribe().unwrap();
    let second = operation.subscribe().unwrap();
    assert!(matches!(first.next().await, Some(Notification::State(_))));

    drop(second);
    assert!(!operation.is_closed());
    drop(first);
    assert!(operation.is_closed());

    let lifecycle = drain_until(&mut events, RunId(0), RunEvent::RunCancelled).await;
    assert!(lifecycle.contains(&RunEvent::TimerReleased));
    assert!(work_dropped.load(Ordering::SeqCst));
    assert!(operation.subscribe().unwrap().next().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn shared_failure_reaches_every_subscriber() {
    let operation = SharedCountdown::new(Countdown::new(1).tick_interval(TICK), async {
        Err::<(), _>(anyhow::anyhow!("shared failure"))
    });
    let first = operation.subscribe().unwrap();
    let second = operation.subscribe().unwrap();

    let (a, b): (Vec<_>, Vec<_>) = tokio::join!(first.collect(), second.collect());
    for seen in [a, b] {
        assert_eq!(seen.len(), 1);
        assert!(matches!(&seen[0], Notification::Failed(err) if err.is_work_failure()));
        assert_eq!(seen[0].label(), "Error");
    }
}

#[test]
fn zero_interval_is_rejected() {
    let result = Countdown::new(1)
        .tick_interval(Duration::ZERO)
        .start(async { anyhow::Ok(()) });
    assert!(matches!(result, Err(CountdownError::InvalidInterval)));
}

#[test]
fn starting_outside_a_runtime_is_a_scheduler_error() {
    let result = Countdown::new(1).start(async { anyhow::Ok(()) });
    assert!(matches!(result, Err(CountdownError::Scheduler(_))));
}

#[test]
fn runtime_shutdown_surfaces_a_scheduler_error() {
    let worker = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_time()
        .build()
        .unwrap();
    let consumer = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();

    let mut states = Countdown::new(5)
        .tick_interval(Duration::from_secs(60))
        .on_runtime(worker.handle().clone())
        .start(futures::future::pending::<anyhow::Result<()>>())
        .unwrap();
    drop(worker);

    let first = consumer.block_on(states.next());
    assert!(matches!(first, Some(Err(CountdownError::Scheduler(_)))));
    assert!(consumer.block_on(states.next()).is_none());
    assert!(states.is_finished());
}

#[tokio::test(start_paused = true)]
async fn run_events_close_after_the_last_notice() {
    let countdown = Countdown::new(1).tick_interval(TICK);
    let mut events = countdown.subscribe_run_events();
    let states = countdown.start(async { anyhow::Ok(()) }).unwrap();
    drop(countdown);

    let seen: Vec<_> = states.collect().await;
    assert_eq!(seen.len(), 2);

    let mut lifecycle = Vec::new();
    loop {
        match events.recv().await {
            Ok(notice) => lifecycle.push(notice.event),
            Err(broadcast::error::RecvError::Closed) => break,
            Err(err) => panic!("unexpected receive error: {:?}", err),
        }
    }
    assert_eq!(lifecycle.last(), Some(&RunEvent::TimerReleased));
    assert!(lifecycle.contains(&RunEvent::RunCompleted));
}

#[test]
fn output_streams_are_unpin_for_any_payload() {
    fn assert_unpin<S: Unpin>() {}
    assert_unpin::<CountdownStream<std::marker::PhantomPinned>>();
    assert_unpin::<SharedSubscriber<std::marker::PhantomPinned>>();
}
