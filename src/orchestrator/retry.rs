use crate::models::{BackoffStrategy, RetryPolicy};
use std::time::Duration;

/// Delay before retry number `retry` (1 = first retry), capped at `max_delay_ms`
pub fn backoff_delay(policy: &RetryPolicy, retry: u32) -> Duration {
    let retry = retry.max(1);
    let base = policy.base_delay_ms;
    let millis = match policy.backoff {
        BackoffStrategy::Fixed => base,
        BackoffStrategy::Linear => base.saturating_mul(u64::from(retry)),
        BackoffStrategy::Exponential => {
            let factor = 1u64.checked_shl(retry - 1).unwrap_or(u64::MAX);
            base.saturating_mul(factor)
        }
    };
    Duration::from_millis(millis.min(policy.max_delay_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(backoff: BackoffStrategy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            backoff,
            base_delay_ms: 100,
            max_delay_ms: 1000,
        }
    }

    #[test]
    fn test_backoff_strategies() {
        let fixed = policy(BackoffStrategy::Fixed);
        assert_eq!(backoff_delay(&fixed, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(&fixed, 4), Duration::from_millis(100));

        let linear = policy(BackoffStrategy::Linear);
        assert_eq!(backoff_delay(&linear, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(&linear, 3), Duration::from_millis(300));

        let exponential = policy(BackoffStrategy::Exponential);
        assert_eq!(backoff_delay(&exponential, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(&exponential, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(&exponential, 3), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_is_capped() {
        let exponential = policy(BackoffStrategy::Exponential);
        assert_eq!(backoff_delay(&exponential, 10), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&exponential, 200), Duration::from_millis(1000));
    }
}
