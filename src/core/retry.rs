//! Backoff policy for caller-side retries
//!
//! The publisher never retries on its own. A caller that wants another go at
//! failed destinations asks a [`RetryPolicy`] how many attempts it has and
//! how long to wait between them.

use std::time::Duration;
use tokio::time::sleep;

/// Attempt budget and exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor applied after every attempt
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy with `max_attempts` attempts and default delays
    ///
    /// # Examples
    ///
    /// ```
    /// use image_publisher::core::RetryPolicy;
    ///
    /// let policy = RetryPolicy::with_attempts(3);
    /// assert!(policy.allows_another(1));
    /// assert!(!policy.allows_another(3));
    /// ```
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Whether another attempt may follow attempt number `completed`
    pub fn allows_another(&self, completed: u32) -> bool {
        completed < self.max_attempts
    }

    /// Delay to wait after attempt number `completed` (1-based)
    pub fn delay_after(&self, completed: u32) -> Duration {
        let exponent = completed.saturating_sub(1) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Sleep for [`Self::delay_after`]
    pub async fn wait(&self, completed: u32) {
        sleep(self.delay_after(completed)).await;
    }
}
