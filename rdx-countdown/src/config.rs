//! Defines the configuration structure for countdown runs.
//!
//! The struct is deserialized with `serde` from an optional TOML file, layered
//! under `COUNTDOWN_*` environment variables, so the cadence and starting
//! count can be changed without touching application code.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Settings for a countdown and for the simulated work of the dev binary.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CountdownConfig {
    /// The starting count.
    #[serde(default = "default_start")]
    pub start: u32,

    /// Milliseconds between counter ticks. Must be greater than zero.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// How long the simulated work takes, in milliseconds.
    #[serde(default = "default_work_delay_ms")]
    pub work_delay_ms: u64,

    /// Makes the simulated work fail instead of producing a value.
    #[serde(default)]
    pub work_fails: bool,
}

impl CountdownConfig {
    /// Loads the configuration from `path` (if given), then applies any
    /// `COUNTDOWN_*` environment overrides, e.g. `COUNTDOWN_START=5`.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("COUNTDOWN").try_parsing(true))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn work_delay(&self) -> Duration {
        Duration::from_millis(self.work_delay_ms)
    }
}

// --- Default value functions for serde ---

fn default_start() -> u32 {
    3
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_work_delay_ms() -> u64 {
    2000
}

impl Default for CountdownConfig {
    fn default() -> Self {
        Self {
            start: default_start(),
            tick_interval_ms: default_tick_interval_ms(),
            work_delay_ms: default_work_delay_ms(),
            work_fails: false,
        }
    }
}
