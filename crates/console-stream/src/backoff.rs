use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponent used for the first retry and after every successful poll.
pub const INITIAL_STEP: u32 = 8;
/// Largest exponent; failures past it keep retrying at `2^MAX_STEP`.
pub const MAX_STEP: u32 = 12;
/// Consecutive failures retried before the stream gives up.
pub const MAX_RETRIES: u32 = MAX_STEP;

/// Exponential retry policy for failed polls: `delay = 2^step` units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    #[serde(default = "default_initial_step")]
    pub initial_step: u32,
    #[serde(default = "default_max_step")]
    pub max_step: u32,
    /// Length of one time unit in milliseconds.
    #[serde(default = "default_unit_ms")]
    pub unit_ms: u64,
    /// Consecutive transient failures that are retried; the next one closes
    /// the stream.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

const fn default_initial_step() -> u32 {
    INITIAL_STEP
}

const fn default_max_step() -> u32 {
    MAX_STEP
}

const fn default_unit_ms() -> u64 {
    1
}

const fn default_max_retries() -> u32 {
    MAX_RETRIES
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_step: default_initial_step(),
            max_step: default_max_step(),
            unit_ms: default_unit_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial_step: u32, max_step: u32) -> Self {
        Self {
            initial_step,
            max_step: max_step.max(initial_step),
            unit_ms: default_unit_ms(),
            max_retries: default_max_retries(),
        }
    }

    pub fn with_unit_ms(mut self, unit_ms: u64) -> Self {
        self.unit_ms = unit_ms.max(1);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Whether the `failures`-th consecutive failure is past the retry ceiling.
    pub fn exhausted(&self, failures: u32) -> bool {
        failures > self.max_retries
    }

    /// Delay for `step` and the step to use for the following failure.
    pub fn next_delay(&self, step: u32) -> (Duration, u32) {
        let step = step.clamp(self.initial_step, self.max_step);
        let units = 1_u64.checked_shl(step).unwrap_or(u64::MAX);
        let delay = Duration::from_millis(units.saturating_mul(self.unit_ms));
        (delay, (step + 1).min(self.max_step))
    }
}

/// Mutable backoff counter owned by one poll loop.
///
/// Holds only the current step; the retry ceiling is counted by the caller.
#[derive(Debug, Clone)]
pub struct BackoffController {
    policy: BackoffPolicy,
    step: u32,
}

impl BackoffController {
    pub fn new(policy: BackoffPolicy) -> Self {
        let step = policy.initial_step;
        Self { policy, step }
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Returns the delay for the current step and escalates.
    pub fn next_delay(&mut self) -> Duration {
        let (delay, next) = self.policy.next_delay(self.step);
        self.step = next;
        delay
    }

    /// Back to the initial step, as after a successful poll.
    pub fn reset(&mut self) -> u32 {
        self.step = self.policy.initial_step;
        self.step
    }
}

impl Default for BackoffController {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_per_step_and_clamps() {
        let p = BackoffPolicy::default();
        assert_eq!(p.next_delay(8), (Duration::from_millis(256), 9));
        assert_eq!(p.next_delay(11), (Duration::from_millis(2048), 12));
        assert_eq!(p.next_delay(12), (Duration::from_millis(4096), 12));
        assert_eq!(p.next_delay(30), (Duration::from_millis(4096), 12));
        assert_eq!(p.next_delay(0), (Duration::from_millis(256), 9));
    }

    #[test]
    fn controller_settles_at_max_step_and_resets() {
        let mut c = BackoffController::default();
        let delays: Vec<u128> = (0..7).map(|_| c.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![256, 512, 1024, 2048, 4096, 4096, 4096]);
        assert_eq!(c.step(), MAX_STEP);
        assert_eq!(c.reset(), INITIAL_STEP);
        assert_eq!(c.next_delay().as_millis(), 256);
    }

    #[test]
    fn ceiling_counts_consecutive_failures() {
        let p = BackoffPolicy::default();
        assert!(!p.exhausted(1));
        assert!(!p.exhausted(MAX_RETRIES));
        assert!(p.exhausted(MAX_RETRIES + 1));
        assert!(BackoffPolicy::default().with_max_retries(0).exhausted(1));
    }

    #[test]
    fn unit_scales_delay() {
        let p = BackoffPolicy::new(2, 4).with_unit_ms(10);
        assert_eq!(p.next_delay(2).0, Duration::from_millis(40));
    }
}
