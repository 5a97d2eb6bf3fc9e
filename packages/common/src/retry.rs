use std::time::Duration;

use rand::Rng;

use crate::workload::WorkloadClass;

/// Base delay for exponential backoff.
pub const BASE_DELAY: Duration = Duration::from_secs(2);

/// Per-class retry policy: attempt budget, backoff cap and time limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum retries before a retryable failure is dead-lettered.
    pub max_retries: u32,
    /// Pre-jitter cap on the exponential backoff delay.
    pub backoff_cap: Duration,
    /// Cooperative interrupt threshold inside the worker.
    pub soft_time_limit: Duration,
    /// Forceful kill threshold enforced by the harness.
    pub hard_time_limit: Duration,
}

impl RetryPolicy {
    pub fn for_class(class: WorkloadClass) -> Self {
        match class {
            WorkloadClass::Default => Self {
                max_retries: 3,
                backoff_cap: Duration::from_secs(20),
                soft_time_limit: Duration::from_secs(540),
                hard_time_limit: Duration::from_secs(600),
            },
            WorkloadClass::Model | WorkloadClass::Cam | WorkloadClass::Sim => Self {
                max_retries: 5,
                backoff_cap: Duration::from_secs(60),
                soft_time_limit: Duration::from_secs(840),
                hard_time_limit: Duration::from_secs(900),
            },
            WorkloadClass::Report | WorkloadClass::Erp => Self {
                max_retries: 5,
                backoff_cap: Duration::from_secs(45),
                soft_time_limit: Duration::from_secs(540),
                hard_time_limit: Duration::from_secs(600),
            },
        }
    }

    /// Backoff delay for the given 0-based attempt, with full jitter.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        retry_delay(attempt, self.backoff_cap)
    }
}

/// Calculate the retry delay using exponential backoff with full jitter:
/// `min(cap, base * 2^attempt) * U(0.5, 1.5)`, clamped pre-jitter.
///
/// `attempt` is 0-based.
pub fn retry_delay(attempt: u32, cap: Duration) -> Duration {
    let exponential = BASE_DELAY.as_secs_f64() * 2f64.powi(attempt.min(62) as i32);
    let capped = exponential.min(cap.as_secs_f64());
    let jitter = rand::rng().random_range(0.5..=1.5);
    Duration::from_secs_f64(capped * jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_bounds() {
        let cap = Duration::from_secs(60);
        for attempt in 0..6 {
            let expected = (2f64 * 2f64.powi(attempt as i32)).min(cap.as_secs_f64());
            for _ in 0..50 {
                let d = retry_delay(attempt, cap).as_secs_f64();
                assert!(
                    d >= expected * 0.5 && d <= expected * 1.5,
                    "attempt {attempt}: delay {d} outside [{}, {}]",
                    expected * 0.5,
                    expected * 1.5
                );
            }
        }
    }

    #[test]
    fn test_cap_applies_before_jitter() {
        // Attempt 10 uncapped would be 2048s; capped at 20s the jittered
        // delay may still reach 30s.
        let d = retry_delay(10, Duration::from_secs(20)).as_secs_f64();
        assert!((10.0..=30.0).contains(&d));
    }

    #[test]
    fn test_large_attempt_does_not_overflow() {
        let d = retry_delay(u32::MAX, Duration::from_secs(60));
        assert!(d <= Duration::from_secs(90));
    }

    #[test]
    fn test_first_retry_windows_for_slow_classes() {
        // First failure backs off within [1s, 3s], second within [2s, 6s].
        let policy = RetryPolicy::for_class(WorkloadClass::Model);
        for _ in 0..50 {
            let first = policy.retry_delay(0).as_secs_f64();
            assert!((1.0..=3.0).contains(&first), "first delay {first}");
            let second = policy.retry_delay(1).as_secs_f64();
            assert!((2.0..=6.0).contains(&second), "second delay {second}");
        }
    }

    #[test]
    fn test_policy_table() {
        assert_eq!(RetryPolicy::for_class(WorkloadClass::Default).max_retries, 3);
        assert_eq!(
            RetryPolicy::for_class(WorkloadClass::Model).backoff_cap,
            Duration::from_secs(60)
        );
        assert_eq!(
            RetryPolicy::for_class(WorkloadClass::Report).backoff_cap,
            Duration::from_secs(45)
        );
        assert_eq!(
            RetryPolicy::for_class(WorkloadClass::Sim).hard_time_limit,
            Duration::from_secs(900)
        );
        for class in WorkloadClass::ALL {
            let p = RetryPolicy::for_class(*class);
            assert!(p.soft_time_limit < p.hard_time_limit);
        }
    }
}
