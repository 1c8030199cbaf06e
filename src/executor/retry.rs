use rand::Rng;
use std::time::Duration;

/// Bounded retry with a stepped backoff schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (so at most `max_retries + 1` requests)
    pub max_retries: u32,
    /// Delay before retry N is `backoff[N]`, clamped to the last entry
    pub backoff: Vec<Duration>,
    /// Add up to 10% random delay on top of the schedule
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: [500, 1000, 2000, 4000]
                .into_iter()
                .map(Duration::from_millis)
                .collect(),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Builds a policy from a millisecond schedule, sorting it so delays never shrink.
    pub fn from_millis(max_retries: u32, backoff_ms: &[u64], jitter: bool) -> Self {
        let mut backoff: Vec<Duration> = backoff_ms.iter().copied().map(Duration::from_millis).collect();
        backoff.sort();
        Self {
            max_retries,
            backoff,
            jitter,
        }
    }

    /// Delay to wait before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self
            .backoff
            .get(attempt as usize)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or(Duration::from_secs(1));

        if !self.jitter || base.is_zero() {
            return base;
        }

        let spread = (base.as_millis() / 10) as u64;
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_is_non_decreasing_and_clamped() {
        let policy = RetryPolicy::from_millis(5, &[400, 100, 200], false);

        let delays: Vec<u128> = (0..6).map(|n| policy.delay_for(n).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 400, 400, 400]);
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let policy = RetryPolicy::from_millis(3, &[1000], true);
        for _ in 0..50 {
            let delay = policy.delay_for(0).as_millis();
            assert!((1000..=1100).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[test]
    fn test_empty_schedule_falls_back_to_one_second() {
        let policy = RetryPolicy::from_millis(1, &[], false);
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
    }
}
