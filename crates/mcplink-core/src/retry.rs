//! Reconnect backoff policy and per-supervisor backoff state.

use std::time::Duration;

/// Exponential backoff policy for reconnection attempts.
///
/// Delays grow as `base * multiplier^attempt`, capped at `cap`. The default
/// configuration (1s base, 2.0 multiplier, 600s cap) yields the delay
/// sequence 1s, 2s, 4s, ... up to 10 minutes.
///
/// The policy is pure: it computes delays but never sleeps. Deliberately no
/// jitter: the bridge maintains a single connection to a single endpoint,
/// and the delay sequence is part of its observable contract.
///
/// # Examples
///
/// ```rust
/// use mcplink_core::retry::BackoffPolicy;
/// use std::time::Duration;
///
/// let policy = BackoffPolicy::default();
/// assert_eq!(policy.next_delay(0), Duration::from_secs(1));
/// assert_eq!(policy.next_delay(3), Duration::from_secs(8));
/// ```
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base: Duration,
    multiplier: f64,
    cap: Duration,
}

impl BackoffPolicy {
    /// Create a builder for a custom policy.
    pub fn builder() -> BackoffPolicyBuilder {
        BackoffPolicyBuilder::default()
    }

    /// Delay to wait before retry number `attempt + 1`.
    ///
    /// `attempt` is 0-indexed after the first failure: `next_delay(0)` is the
    /// wait before the second connection attempt.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let uncapped = self.base.as_secs_f64() * self.multiplier.powf(f64::from(attempt));
        Duration::from_secs_f64(uncapped.min(self.cap.as_secs_f64()))
    }
}

impl Default for BackoffPolicy {
    /// The bridge defaults: 1s base, doubling, capped at 600s.
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            multiplier: 2.0,
            cap: Duration::from_secs(600),
        }
    }
}

/// Builder for [`BackoffPolicy`].
#[derive(Debug, Default)]
pub struct BackoffPolicyBuilder {
    base: Option<Duration>,
    multiplier: Option<f64>,
    cap: Option<Duration>,
}

impl BackoffPolicyBuilder {
    /// Set the delay before the first retry. Default: 1s.
    pub fn base(mut self, base: Duration) -> Self {
        self.base = Some(base);
        self
    }

    /// Set the exponential multiplier. Default: 2.0.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Set the maximum delay. Default: 600s.
    pub fn cap(mut self, cap: Duration) -> Self {
        self.cap = Some(cap);
        self
    }

    /// Build the policy, filling unset fields with defaults.
    pub fn build(self) -> BackoffPolicy {
        let defaults = BackoffPolicy::default();
        BackoffPolicy {
            base: self.base.unwrap_or(defaults.base),
            multiplier: self.multiplier.unwrap_or(defaults.multiplier),
            cap: self.cap.unwrap_or(defaults.cap),
        }
    }
}

/// Failure counter driving the supervisor's reconnect delays.
///
/// The counter is deliberately NOT reset when a connection succeeds: the
/// reference behavior lets backoff keep escalating across sessions, and we
/// preserve it. `reset_on_success` opts into the more conventional behavior
/// (see `MCPLINK_RESET_BACKOFF`).
///
/// Mutated only by the connection supervisor, between cycles.
#[derive(Debug)]
pub struct BackoffState {
    failures: u32,
    reset_on_success: bool,
}

impl BackoffState {
    /// Create a fresh state with zero recorded failures.
    pub fn new(reset_on_success: bool) -> Self {
        Self {
            failures: 0,
            reset_on_success,
        }
    }

    /// Number of failed cycles recorded so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record the end of a failed connection cycle.
    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    /// Record a successful connection.
    ///
    /// A no-op unless reset-on-success was enabled.
    pub fn record_success(&mut self) {
        if self.reset_on_success {
            self.failures = 0;
        }
    }

    /// Delay to observe before the next connection attempt.
    ///
    /// `None` while no failure has been recorded: the first attempt connects
    /// immediately.
    pub fn delay_before_next_attempt(&self, policy: &BackoffPolicy) -> Option<Duration> {
        match self.failures {
            0 => None,
            n => Some(policy.next_delay(n - 1)),
        }
    }
}
