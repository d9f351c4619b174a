//! Growing delays for HTTP retries and stream reconnects.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry settings for LCD/RPC queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    /// Extra `jitter_fraction / 2` of the delay added on top (0.0 = none).
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
            multiplier: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

impl RetryConfig {
    /// Fresh delay sequence for one request.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            multiplier: self.multiplier.max(1.0),
            jitter_fraction: self.jitter_fraction.max(0.0),
            ..Backoff::new(
                Duration::from_millis(self.initial_backoff_ms),
                Duration::from_millis(self.max_backoff_ms),
            )
        }
    }
}

/// Capped exponential delay sequence.
///
/// Each call to [`next_delay`](Self::next_delay) returns the current delay
/// and grows the next one by `multiplier`. `reset` starts over, which the
/// stream supervisor does once a connection delivers a block.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter_fraction: f64,
    current: Duration,
}

impl Backoff {
    /// Doubling delays from `initial` up to `max`, no jitter.
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            multiplier: 2.0,
            jitter_fraction: 0.0,
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = scale(delay, self.multiplier).min(self.max);
        delay + scale(delay, self.jitter_fraction * 0.5)
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    pub fn peek(&self) -> Duration {
        self.current
    }
}

/// Millisecond-resolution `d * factor`.
fn scale(d: Duration, factor: f64) -> Duration {
    Duration::from_millis((d.as_millis() as f64 * factor) as u64)
}
