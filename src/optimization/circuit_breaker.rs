//! Circuit breaker isolating the statistical learning loop
//!
//! Failures are weighted by severity and accumulated in a float counter.
//! Reaching the threshold opens the breaker for an exponentially growing,
//! capped window; the first attempt after the window runs half-open, and a
//! success there closes the breaker and resets the counter.

use crate::config::LearningConfig;
use crate::errors::FailureSeverity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// State transitions kept for inspection
const MAX_STATE_HISTORY: usize = 32;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerState {
    /// Learning runs normally
    Closed,
    /// Learning is skipped until the backoff window elapses
    Open,
    /// One trial cycle is allowed
    HalfOpen,
}

/// Circuit breaker state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerStateChange {
    pub from_state: BreakerState,
    pub to_state: BreakerState,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Breaker thresholds and backoff schedule
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    pub failure_threshold: f64,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl From<&LearningConfig> for BreakerConfig {
    fn from(config: &LearningConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_cap: Duration::from_millis(config.backoff_cap_ms),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LearningCircuitBreaker {
    state: BreakerState,
    failure_count: f64,
    opened_at: Option<Instant>,
    backoff: Duration,
    last_failure: Option<String>,
    config: BreakerConfig,
    state_history: VecDeque<BreakerStateChange>,
}

impl LearningCircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0.0,
            opened_at: None,
            backoff: Duration::ZERO,
            last_failure: None,
            config,
            state_history: VecDeque::new(),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn failure_count(&self) -> f64 {
        self.failure_count
    }

    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    pub fn state_history(&self) -> &VecDeque<BreakerStateChange> {
        &self.state_history
    }

    /// Time left before an open breaker allows a trial cycle
    pub fn remaining_backoff(&self) -> Option<Duration> {
        match (self.state, self.opened_at) {
            (BreakerState::Open, Some(opened)) => Some(self.backoff.saturating_sub(opened.elapsed())),
            _ => None,
        }
    }

    /// Whether a learning cycle may run now; moves Open to HalfOpen once the window elapsed
    pub fn allows_attempt(&mut self) -> bool {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = self.opened_at.map_or(Duration::MAX, |t| t.elapsed());
                if elapsed >= self.backoff {
                    self.transition(BreakerState::HalfOpen, "backoff window elapsed");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        if self.state == BreakerState::HalfOpen {
            self.failure_count = 0.0;
            self.opened_at = None;
            self.last_failure = None;
            self.transition(BreakerState::Closed, "trial cycle succeeded");
            info!("Learning circuit breaker closed");
        }
    }

    pub fn record_failure(&mut self, severity: FailureSeverity, reason: &str) {
        self.failure_count += severity.weight();
        self.last_failure = Some(reason.to_string());
        warn!(
            severity = %severity,
            failure_count = self.failure_count,
            reason = reason,
            "Learning failure recorded"
        );

        let trips = self.state == BreakerState::HalfOpen
            || (self.state == BreakerState::Closed
                && self.failure_count >= self.config.failure_threshold);
        if trips {
            self.backoff = self.backoff_window();
            self.opened_at = Some(Instant::now());
            self.transition(BreakerState::Open, reason);
            warn!(
                backoff_ms = self.backoff.as_millis() as u64,
                "Learning circuit breaker opened"
            );
        }
    }

    /// base × 2^floor(count − threshold), capped
    fn backoff_window(&self) -> Duration {
        let excess = (self.failure_count - self.config.failure_threshold).max(0.0).floor();
        let exponent = excess.min(30.0) as i32;
        let window = self.config.backoff_base.as_secs_f64() * 2f64.powi(exponent);
        Duration::from_secs_f64(window.min(self.config.backoff_cap.as_secs_f64()))
    }

    fn transition(&mut self, to_state: BreakerState, reason: &str) {
        if self.state == to_state {
            return;
        }
        self.state_history.push_back(BreakerStateChange {
            from_state: self.state,
            to_state,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        });
        while self.state_history.len() > MAX_STATE_HISTORY {
            self.state_history.pop_front();
        }
        self.state = to_state;
    }
}
