//! Backoff for transient transaction retries.

use std::time::Duration;

const BASE_MS: u64 = 10;
const MAX_MS: u64 = 200;

/// Exponential backoff for the given attempt (1-indexed), capped.
pub(crate) fn backoff(attempt: u32) -> Duration {
    let exp = BASE_MS.saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
    Duration::from_millis(exp.min(MAX_MS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_and_caps() {
        assert_eq!(backoff(1), Duration::from_millis(10));
        assert_eq!(backoff(2), Duration::from_millis(20));
        assert_eq!(backoff(3), Duration::from_millis(40));
        assert_eq!(backoff(10), Duration::from_millis(200));
    }
}
