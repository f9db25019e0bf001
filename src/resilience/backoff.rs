//! Exponential backoff with jitter before a resend.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Delay before resend number `attempt` (1-based). Attempt 0 means no delay.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let capped_delay = base_ms.saturating_mul(exponential_base).min(max_ms);

    // Up to 10% jitter so resends from many connections spread out.
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

/// Backoff for a resend under the transport's retry configuration.
pub fn retry_delay(attempt: u32, config: &RetryConfig) -> Duration {
    calculate_backoff(attempt, config.base_delay_ms, config.max_delay_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        assert_eq!(calculate_backoff(0, 100, 2000), Duration::ZERO);

        let b1 = calculate_backoff(1, 100, 2000);
        assert!(b1 >= Duration::from_millis(100) && b1 < Duration::from_millis(110));

        let b2 = calculate_backoff(2, 100, 2000);
        assert!(b2 >= Duration::from_millis(200));

        let capped = calculate_backoff(30, 100, 1000);
        assert!(capped >= Duration::from_millis(1000) && capped < Duration::from_millis(1100));
    }

    #[test]
    fn test_zero_base_means_immediate() {
        let config = RetryConfig {
            max_retries: 3,
            base_delay_ms: 0,
            max_delay_ms: 0,
        };
        assert_eq!(retry_delay(2, &config), Duration::ZERO);
    }
}
