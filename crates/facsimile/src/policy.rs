//! Retry and escalation state machine for provider attempts.
//!
//! The machine is a pure transition function over
//! `(provider index, escalation level, transport attempt)`. The async driver
//! in the runtime feeds it one [`Event`] per attempt and performs whatever
//! [`Step`] comes back; nothing here touches the network or a clock.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry budget and backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Transport attempts per (provider, escalation level) before advancing.
    pub attempt_cap: u32,
    /// Highest escalation level tried on a provider.
    pub escalation_ceiling: u8,
    /// Escalation level from which the reduced-scope payload is sent.
    pub reduced_scope_threshold: u8,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_cap: 3,
            escalation_ceiling: 2,
            reduced_scope_threshold: 2,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(8),
        }
    }
}

/// Position of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttemptState {
    pub provider: usize,
    pub escalation: u8,
    /// 1-based transport attempt at this provider and escalation level.
    pub transport_attempt: u32,
    /// 1-based count of invocations across the whole request.
    pub attempt: u32,
}

/// Outcome of the attempt just made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    TransportFailed,
    Rejected,
    Accepted,
}

/// What the driver should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Invoke {
        state: AttemptState,
        /// Delay before invoking.
        backoff: Duration,
        reduced_scope: bool,
    },
    Done,
    Exhausted,
}

impl RetryPolicy {
    /// First step for `providers` configured providers.
    pub fn start(&self, providers: usize) -> Step {
        self.advance_to(0, providers, 0)
    }

    /// Pure transition: given the attempt just made and its outcome.
    pub fn next(&self, providers: usize, state: AttemptState, event: Event) -> Step {
        match event {
            Event::Accepted => Step::Done,
            Event::TransportFailed if state.transport_attempt < self.attempt_cap => {
                self.invoke(
                    AttemptState {
                        transport_attempt: state.transport_attempt + 1,
                        attempt: state.attempt + 1,
                        ..state
                    },
                    self.backoff(state.transport_attempt),
                )
            }
            Event::Rejected if state.escalation < self.escalation_ceiling => self.invoke(
                AttemptState {
                    escalation: state.escalation + 1,
                    transport_attempt: 1,
                    attempt: state.attempt + 1,
                    ..state
                },
                Duration::ZERO,
            ),
            Event::TransportFailed | Event::Rejected => {
                self.advance_to(state.provider + 1, providers, state.attempt)
            }
        }
    }

    /// Exponential backoff after the `failures`-th consecutive transport failure.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_cap)
    }

    pub fn is_reduced_scope(&self, escalation: u8) -> bool {
        escalation >= self.reduced_scope_threshold
    }

    /// Upper bound on invocations for `providers` providers.
    pub fn max_attempts(&self, providers: usize) -> u32 {
        providers as u32 * self.attempt_cap * (u32::from(self.escalation_ceiling) + 1)
    }

    fn advance_to(&self, provider: usize, providers: usize, attempts: u32) -> Step {
        if provider >= providers {
            return Step::Exhausted;
        }
        self.invoke(
            AttemptState {
                provider,
                escalation: 0,
                transport_attempt: 1,
                attempt: attempts + 1,
            },
            Duration::ZERO,
        )
    }

    fn invoke(&self, state: AttemptState, backoff: Duration) -> Step {
        Step::Invoke {
            state,
            backoff,
            reduced_scope: self.is_reduced_scope(state.escalation),
        }
    }
}
