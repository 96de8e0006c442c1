use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

/// Trips after `threshold` consecutive failures and stays open for `cooldown`.
///
/// Shared across calls; one tripped provider session spares every later call
/// the connect timeout until the cooldown passes.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: Mutex::new(BreakerState::default()),
            threshold: threshold.max(1),
            cooldown,
        }
    }

    /// Whether the guarded operation should be attempted.
    pub fn is_available(&self) -> bool {
        let state = match self.state.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.consecutive_failures < self.threshold {
            return true;
        }
        match state.last_failure {
            Some(t) => t.elapsed() >= self.cooldown,
            None => true,
        }
    }

    pub fn record_success(&self) {
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.consecutive_failures = 0;
        state.last_failure = None;
    }

    pub fn record_failure(&self) {
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_failure = Some(Instant::now());
    }
}
