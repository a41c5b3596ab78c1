//! Runtime configuration
//!
//! Tunables are sourced from an optional `labscript.toml`, overridden by
//! `LABSCRIPT_*` environment variables. All values have defaults so a config
//! file is never required.

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Poll granularity while waiting on an interval completion flag, in ms.
    pub interval_poll_ms: u64,

    /// Poll granularity for plain timed blocks and timer threads, in ms.
    pub block_poll_ms: u64,

    /// Sleeps longer than this many seconds go through the blocking progress
    /// indicator; shorter sleeps use a plain timed block.
    pub wait_threshold_secs: f64,

    /// Clamp real sleeps to 0.5s for bench runs without hardware.
    pub debug_sleep: bool,

    /// File extension appended to gosub targets when missing.
    pub script_extension: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            interval_poll_ms: 500,
            block_poll_ms: 50,
            wait_threshold_secs: 1.0,
            debug_sleep: false,
            script_extension: "lab".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from file (if present) and environment.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = match path {
            Some(p) => builder.add_source(config::File::with_name(p)),
            None => builder.add_source(config::File::with_name("labscript").required(false)),
        };

        builder
            .add_source(config::Environment::with_prefix("LABSCRIPT"))
            .build()?
            .try_deserialize()
    }

    pub fn interval_poll(&self) -> Duration {
        Duration::from_millis(self.interval_poll_ms)
    }

    pub fn block_poll(&self) -> Duration {
        Duration::from_millis(self.block_poll_ms)
    }
}
