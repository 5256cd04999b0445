use anyhow::{anyhow, Result};
use colored::Colorize;
use countdown::prelude::*;
use countdown::{ENGINE_NAME, VERSION};
use futures::StreamExt;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // 2. Load the configuration. The first argument, if any, is a TOML file.
    let config_path = env::args().nth(1).map(PathBuf::from);
    let config = CountdownConfig::load(config_path.as_deref())?;
    info!("{} v{} with {:?}", ENGINE_NAME, VERSION, config);

    // 3. Describe the countdown and watch its lifecycle.
    let countdown = Countdown::from_config(&config);
    let run_events = spawn_run_event_listener(&countdown);

    // 4. Share one run between a label renderer and a state logger.
    let work = simulated_work(config.work_delay(), config.work_fails);
    let operation = SharedCountdown::new(countdown, work);

    println!("{}", "Starting work...".dimmed());
    let label = operation.subscribe()?;
    let logger = operation.subscribe()?;
    tokio::join!(render_label(label), log_states(logger));

    // 5. Let the lifecycle listener drain. It ends once the run task and the
    //    last `Countdown` holding the event sender are gone.
    drop(operation);
    if tokio::time::timeout(Duration::from_millis(500), run_events)
        .await
        .is_err()
    {
        warn!("Run event listener did not drain in time.");
    }

    Ok(())
}

/// Stands in for real background work.
async fn simulated_work(delay: Duration, fails: bool) -> Result<Duration> {
    tokio::time::sleep(delay).await;
    if fails {
        return Err(anyhow!("simulated work failed after {:?}", delay));
    }
    Ok(delay)
}

/// Prints what a status label would show: the numeral, "Done" or "Error".
async fn render_label(mut notifications: SharedSubscriber<Duration>) {
    while let Some(notification) = notifications.next().await {
        let text = notification.label();
        match notification {
            Notification::State(state) if state.is_terminal() => println!("{}", text.green().bold()),
            Notification::State(state) if state.is_frozen() => println!("{}", text.yellow()),
            Notification::State(_) => println!("{}", text.cyan()),
            Notification::Failed(_) => println!("{}", text.red().bold()),
        }
    }
}

async fn log_states(mut notifications: SharedSubscriber<Duration>) {
    while let Some(notification) = notifications.next().await {
        match notification {
            Notification::State(state) => info!(
                "[STATE] remaining={} result={:?}",
                state.remaining, state.result
            ),
            Notification::Failed(err) => info!("[STATE] failed: {}", err),
        }
    }
}

fn spawn_run_event_listener(countdown: &Countdown) -> JoinHandle<()> {
    let mut run_rx = countdown.subscribe_run_events();
    tokio::spawn(async move {
        while let Ok(notice) = run_rx.recv().await {
            info!("[RUN {}] => {:?}", notice.run.0, notice.event);
        }
    })
}
