//! Idle-age policy deciding whether an idle connection may be re-leased

use std::time::Duration;

use tokio::time::Instant;

/// What the pool must do with an idle member before leasing it again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Idle for a short while: lease it directly
    Fresh,

    /// Idle long enough that the health check must pass first
    NeedsHealthCheck,

    /// Idle longer than the maximum idle time: dispose without checking
    Expired,
}

/// Eviction thresholds for idle members
///
/// # Examples
///
/// ```
/// use esox_connpool::{EvictionPolicy, Freshness};
/// use std::time::Duration;
///
/// let policy = EvictionPolicy::new(Duration::from_secs(60), Duration::from_secs(1800));
///
/// assert_eq!(policy.classify(Duration::from_secs(5)), Freshness::Fresh);
/// assert_eq!(policy.classify(Duration::from_secs(61)), Freshness::NeedsHealthCheck);
/// assert_eq!(policy.classify(Duration::from_secs(1801)), Freshness::Expired);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// Idle age after which the next lease requires a health check
    pub idle_time_before_health_check: Duration,

    /// Idle age after which the member is disposed unconditionally
    pub max_idle_time: Duration,
}

impl EvictionPolicy {
    pub fn new(idle_time_before_health_check: Duration, max_idle_time: Duration) -> Self {
        Self {
            idle_time_before_health_check,
            max_idle_time,
        }
    }

    /// Classify a member by how long it has been idle
    pub fn classify(&self, idle_for: Duration) -> Freshness {
        if idle_for > self.max_idle_time {
            Freshness::Expired
        } else if idle_for > self.idle_time_before_health_check {
            Freshness::NeedsHealthCheck
        } else {
            Freshness::Fresh
        }
    }

    /// Classify a member idle since `idle_since`, as observed at `now`
    pub fn classify_at(&self, idle_since: Instant, now: Instant) -> Freshness {
        self.classify(now.saturating_duration_since(idle_since))
    }
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_secs(30 * 60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds_are_exclusive() {
        let policy = EvictionPolicy::new(Duration::from_secs(10), Duration::from_secs(20));

        assert_eq!(policy.classify(Duration::from_secs(10)), Freshness::Fresh);
        assert_eq!(
            policy.classify(Duration::from_secs(20)),
            Freshness::NeedsHealthCheck
        );
        assert_eq!(policy.classify(Duration::from_millis(20_001)), Freshness::Expired);
    }

    #[test]
    fn test_zero_health_check_age_checks_every_reuse() {
        let policy = EvictionPolicy::new(Duration::ZERO, Duration::from_secs(20));
        assert_eq!(
            policy.classify(Duration::from_millis(1)),
            Freshness::NeedsHealthCheck
        );
        assert_eq!(policy.classify(Duration::ZERO), Freshness::Fresh);
    }

    #[test]
    fn test_max_idle_wins_over_health_check() {
        let policy = EvictionPolicy::new(Duration::from_secs(60), Duration::from_secs(30));
        assert_eq!(policy.classify(Duration::from_secs(45)), Freshness::Expired);
    }

    #[test]
    fn test_classify_at_tolerates_clock_order() {
        let policy = EvictionPolicy::default();
        let now = Instant::now();
        let later = now + Duration::from_secs(1);
        assert_eq!(policy.classify_at(later, now), Freshness::Fresh);
    }
}
