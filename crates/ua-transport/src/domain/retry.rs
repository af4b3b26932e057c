//! Retry classification for failed writes.
//!
//! A request gets at most two attempts. Only a write that hit a closed
//! channel on the first attempt is re-dispatched; every other failure is
//! terminal and surfaced with its cause.

use crate::domain::errors::ChannelError;
use std::time::Duration;

/// Which dispatch attempt a request is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    First,
    Retry,
}

impl Attempt {
    pub fn is_first(&self) -> bool {
        matches!(self, Self::First)
    }

    /// Number of attempts made so far, counting this one.
    pub fn number(&self) -> u32 {
        match self {
            Self::First => 1,
            Self::Retry => 2,
        }
    }
}

/// What to do after a write failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then re-acquire a channel and write again
    RetryAfter(Duration),
    /// Fail the caller with the write error
    Fail,
}

/// Single-retry policy for writes that race with channel closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    delay: Duration,
    enabled: bool,
}

impl RetryPolicy {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            enabled: true,
        }
    }

    /// Policy that never retries.
    pub fn disabled() -> Self {
        Self {
            delay: Duration::ZERO,
            enabled: false,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Classify a write failure.
    pub fn on_write_failure(&self, error: &ChannelError, attempt: Attempt) -> RetryDecision {
        if self.enabled && attempt.is_first() && error.is_channel_closed() {
            RetryDecision::RetryAfter(self.delay)
        } else {
            RetryDecision::Fail
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(crate::domain::config::DEFAULT_RETRY_DELAY)
    }
}
