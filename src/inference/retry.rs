//! Initialization retry budget and backoff

use std::time::Duration;

/// Longest single backoff delay
const MAX_DELAY: Duration = Duration::from_secs(300);

/// Bounded exponential backoff
///
/// After the `n`th consecutive failure (1-based) the manager waits
/// `unit * base^n` before trying again, for at most `max_retries` retries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: f64,
    pub unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 2.0)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base: f64) -> Self {
        Self {
            max_retries,
            base,
            unit: Duration::from_secs(1),
        }
    }

    pub fn with_unit(mut self, unit: Duration) -> Self {
        self.unit = unit;
        self
    }

    /// Delay before retry number `retry` (1-based), or `None` once the
    /// budget is spent
    pub fn delay_for(&self, retry: u32) -> Option<Duration> {
        if retry == 0 || retry > self.max_retries {
            return None;
        }
        let factor = self.base.powi(retry as i32);
        let secs = self.unit.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= MAX_DELAY.as_secs_f64() {
            return Some(MAX_DELAY);
        }
        Some(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_delays() {
        let policy = RetryPolicy::new(3, 2.0);
        assert_eq!(policy.delay_for(1), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_secs(4)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_secs(8)));
        assert_eq!(policy.delay_for(4), None);
    }

    #[test]
    fn test_zero_budget() {
        let policy = RetryPolicy::new(0, 2.0);
        assert_eq!(policy.delay_for(1), None);
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::new(40, 3.0);
        assert_eq!(policy.delay_for(30), Some(MAX_DELAY));
    }

    #[test]
    fn test_custom_unit() {
        let policy = RetryPolicy::new(2, 2.0).with_unit(Duration::from_millis(10));
        assert_eq!(policy.delay_for(2), Some(Duration::from_millis(40)));
    }
}
