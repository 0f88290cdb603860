//! Run/retry state machine for one benchmark.
//!
//! `Pending -> Running -> {Succeeded, RetryExhausted}`. A benchmark with `R`
//! repetitions and `K` retries launches at most `R + K` attempts and stops
//! once `R` have succeeded. Each failed attempt (non-zero exit or spawn
//! failure) consumes one retry; exceeding `K` exhausts the loop.
//!
//! [`RunLoop::record`] is a pure transition: it takes the loop by value and
//! returns the next one, so the policy is testable without any I/O.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Succeeded,
    RetryExhausted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Succeeded | RunState::RetryExhausted)
    }
}

/// What happened to one launch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Exited(i32),
    SpawnFailed,
}

impl AttemptOutcome {
    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 {
            AttemptOutcome::Succeeded
        } else {
            AttemptOutcome::Exited(code)
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Succeeded)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLoop {
    repetitions: u32,
    retries: u32,
    launched: u32,
    successes: u32,
    retry_count: u32,
    exhausted: bool,
}

impl RunLoop {
    pub fn new(repetitions: u32, retries: u32) -> Self {
        Self {
            repetitions,
            retries,
            launched: 0,
            successes: 0,
            retry_count: 0,
            exhausted: false,
        }
    }

    pub fn state(&self) -> RunState {
        if self.exhausted {
            RunState::RetryExhausted
        } else if self.successes >= self.repetitions {
            RunState::Succeeded
        } else if self.launched >= self.max_attempts() {
            // unreachable while failures are bounded by `retries`
            RunState::RetryExhausted
        } else if self.launched == 0 {
            RunState::Pending
        } else {
            RunState::Running
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.repetitions.saturating_add(self.retries)
    }

    /// Index of the next attempt to launch, `None` once terminal.
    pub fn next_attempt(&self) -> Option<u32> {
        if self.state().is_terminal() {
            None
        } else {
            Some(self.launched)
        }
    }

    /// Transition on the outcome of the attempt returned by `next_attempt`.
    #[must_use]
    pub fn record(self, outcome: AttemptOutcome) -> Self {
        if self.state().is_terminal() {
            return self;
        }
        let mut next = self;
        next.launched += 1;
        if outcome.is_success() {
            next.successes += 1;
        } else {
            next.retry_count += 1;
            if next.retry_count > next.retries {
                next.exhausted = true;
            }
        }
        next
    }

    pub fn launched(&self) -> u32 {
        self.launched
    }

    pub fn successes(&self) -> u32 {
        self.successes
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn retries_exhausted(&self) -> bool {
        self.state() == RunState::RetryExhausted
    }
}
