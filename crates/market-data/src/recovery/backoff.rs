use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff between retries of the same provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Backoff {
    pub fn new(initial_delay: Duration, multiplier: f64) -> Self {
        Self {
            initial_delay,
            max_delay: Duration::from_secs(60),
            multiplier,
        }
    }

    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay before retry number `attempt` (0-based), capped at `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth() {
        let backoff = Backoff::new(Duration::from_millis(500), 2.0);
        assert_eq!(backoff.delay(0), Duration::from_millis(500));
        assert_eq!(backoff.delay(1), Duration::from_millis(1_000));
        assert_eq!(backoff.delay(3), Duration::from_millis(4_000));
    }

    #[test]
    fn test_capped_at_max_delay() {
        let backoff = Backoff::default().max_delay(Duration::from_secs(5));
        assert_eq!(backoff.delay(10), Duration::from_secs(5));
    }

    #[test]
    fn test_multiplier_below_one_is_constant() {
        let backoff = Backoff::new(Duration::from_secs(2), 0.5);
        assert_eq!(backoff.delay(4), Duration::from_secs(2));
    }
}
