/// Exponential backoff schedule
use rand::Rng;
use std::time::Duration;

/// Delay schedule `base * factor^(n-1)`, capped at `max_delay`, for attempts
/// `1..=max_attempts`. Past the ceiling there is no next delay.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
    /// Shave up to 20% off each delay. Breaks strict monotonicity, so it is
    /// off unless a caller asks for it.
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
            jitter: false,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, factor: f64, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            factor,
            max_delay,
            max_attempts,
            jitter: false,
        }
    }

    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Delay to wait before attempt `attempt` (1-based).
    ///
    /// Returns `None` once the attempt ceiling is exceeded.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }

        let factor = if self.factor.is_finite() {
            self.factor.max(1.0)
        } else {
            1.0
        };
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let raw = self.base.as_secs_f64() * factor.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64());
        let delay = Duration::from_secs_f64(capped.max(0.0));

        if self.jitter {
            let shave = rand::thread_rng().gen_range(0.0..0.2);
            Some(delay.mul_f64(1.0 - shave))
        } else {
            Some(delay)
        }
    }

    /// Whether another attempt is allowed after `attempts_made` failures.
    pub fn allows(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Every delay in the schedule, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..=self.max_attempts).filter_map(move |n| self.delay_for_attempt(n))
    }
}
