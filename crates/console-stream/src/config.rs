use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;
use crate::errors::ConsoleError;

/// When the debounced health transition is armed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthArming {
    /// Arm when an attempt fails; long-polling requests that simply wait for
    /// output never raise the indicator.
    #[default]
    OnFailure,
    /// Arm whenever a fetch is issued; any request outstanding longer than the
    /// debounce window raises the indicator.
    OnEveryPoll,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthOptions {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default)]
    pub arming: HealthArming,
}

const fn default_debounce_ms() -> u64 {
    1_000
}

impl Default for HealthOptions {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            arming: HealthArming::default(),
        }
    }
}

impl HealthOptions {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Where the poll loop runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffloadMode {
    /// Offload when the current runtime can run the worker in parallel.
    #[default]
    Auto,
    /// Always poll from the driver task.
    Never,
    /// Always use the background worker (falls back to direct polling if it
    /// cannot be started).
    Always,
}

impl OffloadMode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "never" | "off" | "0" | "false" | "direct" => Some(Self::Never),
            "always" | "on" | "1" | "true" | "worker" => Some(Self::Always),
            _ => None,
        }
    }
}

/// Behavior options for a console stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamOptions {
    #[serde(default)]
    pub backoff: BackoffPolicy,
    #[serde(default)]
    pub health: HealthOptions,
    #[serde(default)]
    pub offload: OffloadMode,
    /// Capacity of the worker command/result channels.
    #[serde(default = "default_worker_channel_capacity")]
    pub worker_channel_capacity: usize,
    /// Capacity of the broadcast channel behind `ConsoleStream::next_event`.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

const fn default_worker_channel_capacity() -> usize {
    4
}

const fn default_event_capacity() -> usize {
    256
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            health: HealthOptions::default(),
            offload: OffloadMode::default(),
            worker_channel_capacity: default_worker_channel_capacity(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl StreamOptions {
    /// Defaults overridden by `CONSOLE_STREAM_OFFLOAD` (`auto`/`never`/`always`)
    /// and `CONSOLE_STREAM_HEALTH_DEBOUNCE_MS`.
    pub fn from_env() -> Result<Self, ConsoleError> {
        let mut options = Self::default();
        if let Ok(raw) = std::env::var("CONSOLE_STREAM_OFFLOAD") {
            options.offload = OffloadMode::parse(&raw).ok_or_else(|| {
                ConsoleError::Config(format!("invalid CONSOLE_STREAM_OFFLOAD value: {raw}"))
            })?;
        }
        if let Ok(raw) = std::env::var("CONSOLE_STREAM_HEALTH_DEBOUNCE_MS") {
            options.health.debounce_ms = raw.trim().parse().map_err(|e| {
                ConsoleError::Config(format!("invalid CONSOLE_STREAM_HEALTH_DEBOUNCE_MS: {e}"))
            })?;
        }
        Ok(options)
    }

    /// Sets where fetches run.
    pub fn offload(mut self, mode: OffloadMode) -> Self {
        self.offload = mode;
        self
    }

    /// Replaces the retry policy, including its retry ceiling.
    pub fn backoff(mut self, policy: BackoffPolicy) -> Self {
        self.backoff = policy;
        self
    }

    /// Sets when the connection-health debounce is armed.
    pub fn health_arming(mut self, arming: HealthArming) -> Self {
        self.health.arming = arming;
        self
    }

    /// Sets how long a pending attempt may take before the connection counts as unhealthy.
    pub fn health_debounce(mut self, debounce: Duration) -> Self {
        self.health.debounce_ms = debounce.as_millis() as u64;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ConsoleError> {
        if self.backoff.initial_step > self.backoff.max_step {
            return Err(ConsoleError::Validation(
                "backoff initial_step must not exceed max_step".into(),
            ));
        }
        if self.backoff.max_step >= 63 {
            return Err(ConsoleError::Validation(
                "backoff max_step must be below 63".into(),
            ));
        }
        if self.worker_channel_capacity == 0 || self.event_capacity == 0 {
            return Err(ConsoleError::Validation(
                "channel capacities must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
