//! Pure scheduling rules. No I/O, no clock reads — callers supply `now`.

use std::time::Duration;

/// The outcome of classifying a failed attempt against the retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Reschedule for another attempt after `backoff_delay`.
    Retry,
    /// Retry budget exhausted; move the job to the dead letter queue.
    Dead,
}

/// `backoff_delay(attempts, base) = base^attempts` seconds. No jitter.
///
/// The first retry after the attempt-#1 failure waits `base` seconds; the
/// retry after attempt #2 waits `base^2`; and so on.
pub fn backoff_delay(attempts: u32, base: u32) -> Duration {
    Duration::from_secs(base.saturating_pow(attempts) as u64)
}

/// Returns `Dead` iff the post-increment `attempts` has reached the retry
/// budget; `Retry` otherwise.
pub fn classify_failure(attempts: u32, max_retries: u32) -> FailureOutcome {
    if attempts >= max_retries {
        FailureOutcome::Dead
    } else {
        FailureOutcome::Retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delay_matches_power_formula() {
        for base in 1u32..5 {
            for attempts in 0u32..6 {
                assert_eq!(
                    backoff_delay(attempts, base),
                    Duration::from_secs(base.pow(attempts) as u64)
                );
            }
        }
    }

    #[test]
    fn backoff_delay_strictly_increasing_for_base_above_one() {
        for base in 2u32..6 {
            let mut prev = backoff_delay(0, base);
            for attempts in 1u32..6 {
                let next = backoff_delay(attempts, base);
                assert!(next > prev, "base={base} attempts={attempts}");
                prev = next;
            }
        }
    }

    #[test]
    fn classify_failure_dead_exactly_at_budget() {
        assert_eq!(classify_failure(2, 3), FailureOutcome::Retry);
        assert_eq!(classify_failure(3, 3), FailureOutcome::Dead);
        assert_eq!(classify_failure(4, 3), FailureOutcome::Dead);
    }

    #[test]
    fn classify_failure_zero_budget_always_dead() {
        assert_eq!(classify_failure(1, 0), FailureOutcome::Dead);
    }
}
