//! Retry policy: decides backoff delays.

use std::time::Duration;

use crate::domain::Decision;

/// Exponential backoff with a cap.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Base delay for the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// No delay exceeds this.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, given the number of attempts already made (1-indexed).
    ///
    /// `min(base_delay * multiplier^(attempts - 1), max_delay)`. With the defaults:
    /// - attempt 1 (first failure): 2s
    /// - attempt 2: 4s
    /// - attempt 3: 8s
    /// - ...
    /// - attempt 6 onwards: 60s
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let cap = self.max_delay.as_secs_f64();
        if !delay_secs.is_finite() || delay_secs >= cap {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs)
    }

    /// Retry while `attempts < max_attempts`, otherwise give up.
    pub fn decide(&self, attempts: u32, max_attempts: u32) -> Decision {
        if attempts >= max_attempts {
            Decision::GiveUp {
                reason: format!("max attempts reached: {attempts}/{max_attempts}"),
            }
        } else {
            let delay = self.next_delay(attempts);
            Decision::Retry {
                delay,
                reason: format!(
                    "retry attempt {}/{} after {:?}",
                    attempts + 1,
                    max_attempts,
                    delay
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn default_policy_has_reasonable_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay, Duration::from_secs(2));
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.max_delay, Duration::from_secs(60));
    }

    #[rstest]
    #[case(1, 2)]
    #[case(2, 4)]
    #[case(3, 8)]
    #[case(5, 32)]
    #[case(6, 60)]
    #[case(40, 60)]
    fn exponential_backoff_is_capped(#[case] attempts: u32, #[case] secs: u64) {
        assert_eq!(
            RetryPolicy::default().next_delay(attempts),
            Duration::from_secs(secs)
        );
    }

    #[test]
    fn delays_never_decrease() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = (1..=20).map(|a| policy.next_delay(a)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn decide_gives_up_at_max_attempts() {
        let policy = RetryPolicy::default();
        assert!(matches!(
            policy.decide(1, 3),
            Decision::Retry { delay, .. } if delay == Duration::from_secs(2)
        ));
        assert!(matches!(policy.decide(3, 3), Decision::GiveUp { .. }));
    }
}
