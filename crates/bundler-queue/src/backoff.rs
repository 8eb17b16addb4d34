//! Exponential backoff with a 1s base and a 5m cap, per job retry policy.

use std::time::Duration;

const BASE: Duration = Duration::from_secs(1);
const CAP: Duration = Duration::from_secs(5 * 60);

/// Delay before the next retry given a 1-indexed attempt number that already failed.
///
/// `2^(attempt-1)` seconds, capped at 5 minutes. `attempt = 1` (the first failure) yields
/// the base 1s delay.
pub fn backoff_for_attempt(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let secs = BASE.as_secs().saturating_mul(1u64 << exponent);
    Duration::from_secs(secs).min(CAP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_exponentially_until_capped() {
        assert_eq!(backoff_for_attempt(1), Duration::from_secs(1));
        assert_eq!(backoff_for_attempt(2), Duration::from_secs(2));
        assert_eq!(backoff_for_attempt(3), Duration::from_secs(4));
        assert_eq!(backoff_for_attempt(10), CAP);
    }
}
