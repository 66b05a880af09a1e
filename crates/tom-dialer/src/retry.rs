use std::time::Duration;

use rand::Rng;

/// Jitter applied to each backoff, as a fraction of the base delay (±25%).
pub const JITTER_FRACTION: f64 = 0.25;

/// Retry policy for bound dials.
///
/// Up to `max_retries + 1` attempts. Before retry `n` (1-based) the dialer
/// waits `initial_backoff * multiplier^(n-1)`, jittered by ±25% and capped
/// at `max_backoff`.
///
/// ```rust
/// use std::time::Duration;
/// use tom_dialer::RetryPolicy;
///
/// let policy = RetryPolicy::default().max_retries(5).initial_backoff(Duration::from_millis(50));
/// assert_eq!(policy.max_attempts(), 6);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub(crate) max_retries: u32,
    pub(crate) initial_backoff: Duration,
    pub(crate) max_backoff: Duration,
    pub(crate) multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self::default().max_retries(0)
    }

    /// Number of retries after the first attempt (default: 3).
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Delay before the first retry (default: 100 ms).
    pub fn initial_backoff(mut self, delay: Duration) -> Self {
        self.initial_backoff = delay;
        self
    }

    /// Upper bound on any single delay (default: 5 s).
    pub fn max_backoff(mut self, delay: Duration) -> Self {
        self.max_backoff = delay;
        self
    }

    /// Growth factor between retries (default: 2.0).
    pub fn multiplier(mut self, factor: f64) -> Self {
        self.multiplier = factor;
        self
    }

    /// Total attempts this policy allows, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Jittered delay before retry `retry` (1-based). Zero for `retry == 0`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let jitter = rand::rng().random_range(-JITTER_FRACTION..=JITTER_FRACTION);
        self.backoff_with_jitter(retry, jitter)
    }

    /// Un-jittered delay before retry `retry`, capped at `max_backoff`.
    pub fn base_backoff(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        self.clamp(self.raw_backoff(retry))
    }

    /// Jitter applies to the uncapped delay; the cap comes last, so retries
    /// well past it wait exactly `max_backoff`.
    pub(crate) fn backoff_with_jitter(&self, retry: u32, jitter: f64) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        self.clamp(self.raw_backoff(retry) * (1.0 + jitter))
    }

    /// `initial_backoff * multiplier^(retry-1)` in seconds, possibly infinite.
    fn raw_backoff(&self, retry: u32) -> f64 {
        let exp = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        self.initial_backoff.as_secs_f64() * self.multiplier.powi(exp)
    }

    fn clamp(&self, secs: f64) -> Duration {
        let max = self.max_backoff.as_secs_f64();
        if !secs.is_finite() || secs >= max {
            return self.max_backoff;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}
