//! # Countdown
//!
//! A bounded countdown combinator for Tokio.
//!
//! A countdown runs a piece of asynchronous work alongside a fixed-cadence
//! timer and produces a single, coalesced stream of status updates. The
//! visible counter ticks down once per interval, and the work's result is
//! only revealed when the counter reaches zero, even if the work finished
//! long before. If the work is slower than the countdown, the display freezes
//! at `0` until the result lands.
//!
//! ## Core Concepts
//!
//! - **CounterTimer**: emits `n, n-1, ..., 0`, the first value one interval
//!   after the run starts.
//! - **Fold**: a single-writer state machine that merges counter ticks and the
//!   work completion into a `CountdownState`, hiding the result until zero and
//!   suppressing states that do not change what a consumer would display.
//! - **Cancellation**: dropping or cancelling the output releases the timer and
//!   abandons the in-flight work. Nothing is delivered afterwards.
//! - **Sharing**: `SharedCountdown` lets several consumers observe one run; the
//!   work executes once no matter how many are attached.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use countdown::prelude::*;
//! use futures::StreamExt;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // 1. Describe the countdown.
//!     let countdown = Countdown::new(3).tick_interval(Duration::from_secs(1));
//!
//!     // 2. Start it with some background work.
//!     let mut states = countdown.start(async {
//!         tokio::time::sleep(Duration::from_secs(2)).await;
//!         anyhow::Ok("payload")
//!     })?;
//!
//!     // 3. Consume the coalesced states.
//!     while let Some(state) = states.next().await {
//!         println!("{}", state?.label());
//!     }
//!     Ok(())
//! }
//! ```

pub const ENGINE_NAME: &str = "Countdown";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod common;
pub mod components;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod shared;
pub mod time;

/// A prelude module for easy importing of the most common countdown types.
pub mod prelude {
    pub use crate::common::{RunId, SubscriberId};
    pub use crate::config::CountdownConfig;
    pub use crate::engine::{Countdown, CountdownStream, Subscription};
    pub use crate::error::CountdownError;
    pub use crate::events::{CountdownState, RunEvent, RunNotice, RunOutcome, Tick};
    pub use crate::shared::{Notification, SharedCountdown, SharedSubscriber};
}
