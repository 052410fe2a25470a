// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Reconnect backoff.
//
// Connection-level errors are classified as Transient (reconnect after a
// delay) or Permanent (configuration problem, give up). Transient errors are
// retried for as long as the process runs, with an exponentially growing,
// capped delay that resets once a connection has stayed up long enough.

use std::time::Duration;

use scanwerk_core::config::TimingConfig;
use scanwerk_core::error::ScanwerkError;
use scanwerk_core::types::ErrorClass;
use tracing::{debug, info};

/// Largest multiple of the base delay we ever wait.
const MAX_BACKOFF_FACTOR: u32 = 8;

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Maximum delay between reconnects.
    pub max_delay: Duration,
    /// A connection that lasted this long resets the backoff.
    pub stable_after: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&TimingConfig::default())
    }
}

impl From<&TimingConfig> for RetryConfig {
    fn from(timing: &TimingConfig) -> Self {
        let base_delay = timing.reconnect_delay();
        Self {
            base_delay,
            max_delay: base_delay.saturating_mul(MAX_BACKOFF_FACTOR),
            stable_after: timing.reregister_interval(),
        }
    }
}

/// Result of evaluating whether to reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reconnect after this delay.
    RetryAfter(Duration),
    /// Do not reconnect.
    GiveUp(ErrorClass),
}

/// Classify a connection error.
pub fn classify_error(err: &ScanwerkError) -> ErrorClass {
    match err {
        ScanwerkError::Config(_) | ScanwerkError::PatternToken(_) => ErrorClass::Permanent,

        // Device went away, rebooted, timed out or answered nonsense while
        // starting up: all worth another try.
        ScanwerkError::Transport(_)
        | ScanwerkError::Protocol(_)
        | ScanwerkError::PoweringDown
        | ScanwerkError::Format(_)
        | ScanwerkError::PipelineStep { .. }
        | ScanwerkError::Pdf(_)
        | ScanwerkError::Image(_)
        | ScanwerkError::Resource(_)
        | ScanwerkError::Io(_)
        | ScanwerkError::Serialization(_) => ErrorClass::Transient,
    }
}

/// Decide whether to reconnect after `attempt` consecutive failures.
pub fn should_retry(err: &ScanwerkError, attempt: u32, config: &RetryConfig) -> RetryDecision {
    match classify_error(err) {
        ErrorClass::Permanent => {
            info!(error = %err, "permanent error, not reconnecting");
            RetryDecision::GiveUp(ErrorClass::Permanent)
        }
        ErrorClass::Transient => {
            let delay = compute_delay(attempt, config);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
            RetryDecision::RetryAfter(delay)
        }
    }
}

/// Counts consecutive failed connections.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        Self { config, attempt: 0 }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record a lost connection that had been up for `connected_for`.
    pub fn on_failure(&mut self, err: &ScanwerkError, connected_for: Duration) -> RetryDecision {
        if connected_for >= self.config.stable_after {
            self.attempt = 0;
        }
        let decision = should_retry(err, self.attempt, &self.config);
        if matches!(decision, RetryDecision::RetryAfter(_)) {
            self.attempt = self.attempt.saturating_add(1);
        }
        decision
    }
}

/// Exponential backoff with jitter.
///
/// delay = min(base * 2^attempt + jitter, max_delay)
/// jitter is in [0, base / 4).
fn compute_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let base_ms = config.base_delay.as_millis() as u64;
    let exp_ms = base_ms.saturating_mul(1u64 << attempt.min(10));
    let total_ms = exp_ms.saturating_add(jitter(base_ms / 4, attempt));
    let capped_ms = total_ms.min(config.max_delay.as_millis() as u64);
    Duration::from_millis(capped_ms)
}

/// Deterministic spread in [0, span).
fn jitter(span_ms: u64, attempt: u32) -> u64 {
    let hash = (attempt as u64).wrapping_mul(6364136223846793005);
    hash % span_ms.max(1)
}
