//! Backoff interval computation (spec §4.10): steps that do not succeed are
//! retried with an exponentially growing delay, capped higher once any step
//! in the workflow has actually failed.

use oam_engine_core::config::BackoffConfig;

/// `interval = clamp(minBackoff, 2^(minSeenAttemptCount) * 0.05s, cap)`, where
/// `cap` is `failedBackoffMax` if any step in the workflow has failed, else
/// `waitBackoffMax`. With no counter yet recorded the caller seeds
/// `min_seen_attempt_count` at [`BackoffConfig::initial_min_seen_attempt_count`],
/// chosen high enough that the raw value already exceeds both caps — so an
/// absent counter behaves exactly like a saturated one.
pub fn backoff_interval_secs(min_seen_attempt_count: u32, any_step_failed: bool, config: &BackoffConfig) -> f64 {
    let cap = if any_step_failed { config.failed_backoff_max_secs } else { config.wait_backoff_max_secs };
    let raw = 2f64.powi(min_seen_attempt_count.min(62) as i32) * 0.05;
    raw.clamp(config.min_backoff_secs, cap)
}

/// The minimum attempt count across every step that has not yet succeeded
/// (spec §4.10): a single freshly-scheduled step must not be starved by a
/// backoff interval driven by a different step that has retried for a while.
pub fn min_seen_attempt_count(counts: impl IntoIterator<Item = u32>, initial: u32) -> u32 {
    counts.into_iter().min().unwrap_or(initial)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_counter_saturates_at_wait_cap() {
        let config = BackoffConfig::default();
        let interval = backoff_interval_secs(config.initial_min_seen_attempt_count, false, &config);
        assert_eq!(interval, config.wait_backoff_max_secs);
    }

    #[test]
    fn absent_counter_saturates_at_failed_cap_once_a_step_failed() {
        let config = BackoffConfig::default();
        let interval = backoff_interval_secs(config.initial_min_seen_attempt_count, true, &config);
        assert_eq!(interval, config.failed_backoff_max_secs);
    }

    #[test]
    fn low_attempt_counts_grow_exponentially_before_saturating() {
        let config = BackoffConfig::default();
        let at_one = backoff_interval_secs(1, false, &config);
        let at_three = backoff_interval_secs(3, false, &config);
        assert!(at_one < at_three);
        assert!(at_three <= config.wait_backoff_max_secs);
    }

    #[test]
    fn min_seen_attempt_count_picks_the_smallest_running_counter() {
        assert_eq!(min_seen_attempt_count([5, 2, 9], 15), 2);
        assert_eq!(min_seen_attempt_count(std::iter::empty(), 15), 15);
    }
}
