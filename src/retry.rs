// gateway/src/retry.rs

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("retry policy needs at least one attempt")]
    NoAttempts,
    #[error("attempt timeout must be greater than zero")]
    ZeroTimeout,
    #[error("backoff must start at >= 1ms and grow by a factor >= 2 (got {base_ms}ms x{factor})")]
    FlatBackoff { base_ms: u128, factor: u32 },
    #[error("backoff before attempt {attempts} overflows")]
    Overflow { attempts: u32 },
}

/// Bounds for one dispatch: attempts, per-attempt deadline, and the backoff
/// curve between attempts. Delays have no jitter so a given attempt number
/// always waits the same time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub base_delay: Duration,
    pub factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(30),
            base_delay: Duration::from_millis(250),
            factor: 2,
        }
    }
}

impl RetryPolicy {
    /// Checks that every wait is strictly longer than the one before it for
    /// all attempts this policy allows.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.max_attempts == 0 {
            return Err(PolicyError::NoAttempts);
        }
        if self.attempt_timeout.is_zero() {
            return Err(PolicyError::ZeroTimeout);
        }
        let base_ms = self.base_delay.as_millis();
        if base_ms == 0 || self.factor < 2 {
            return Err(PolicyError::FlatBackoff { base_ms, factor: self.factor });
        }
        if self.max_attempts > 1 {
            let last = u64::try_from(base_ms)
                .ok()
                .zip(u64::from(self.factor).checked_pow(self.max_attempts - 2))
                .and_then(|(b, m)| b.checked_mul(m));
            if last.is_none() {
                return Err(PolicyError::Overflow { attempts: self.max_attempts });
            }
        }
        Ok(())
    }

    /// Wait after failed attempt `attempt` (1-based) before the next one:
    /// `base * factor^(attempt - 1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let base = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let mult = u64::from(self.factor).saturating_pow(attempt - 1);
        Duration::from_millis(base.saturating_mul(mult))
    }

    /// Upper bound on time spent in a dispatch that uses every attempt.
    pub fn worst_case(&self) -> Duration {
        (1..self.max_attempts)
            .map(|a| self.delay_for(a))
            .fold(self.attempt_timeout.saturating_mul(self.max_attempts), Duration::saturating_add)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_strictly_increase() {
        let p = RetryPolicy { max_attempts: 6, ..Default::default() };
        let delays: Vec<_> = (1..p.max_attempts).map(|a| p.delay_for(a)).collect();
        assert_eq!(delays[0], Duration::from_millis(250));
        assert_eq!(delays[1], Duration::from_millis(500));
        assert!(delays.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn delay_is_a_pure_function_of_attempt() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for(3), p.delay_for(3));
        assert_eq!(p.delay_for(0), Duration::ZERO);
    }

    #[test]
    fn worst_case_covers_timeouts_and_waits() {
        let p = RetryPolicy {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(1),
            base_delay: Duration::from_millis(100),
            factor: 3,
        };
        assert_eq!(p.worst_case(), Duration::from_millis(3000 + 100 + 300));
    }

    #[test]
    fn default_policy_is_valid() {
        assert_eq!(RetryPolicy::default().validate(), Ok(()));
    }

    #[test]
    fn flat_or_overflowing_curves_are_refused() {
        let p = RetryPolicy { factor: 1, ..Default::default() };
        assert!(matches!(p.validate(), Err(PolicyError::FlatBackoff { .. })));
        let p = RetryPolicy { base_delay: Duration::from_micros(500), ..Default::default() };
        assert!(matches!(p.validate(), Err(PolicyError::FlatBackoff { .. })));
        let p = RetryPolicy { max_attempts: 0, ..Default::default() };
        assert_eq!(p.validate(), Err(PolicyError::NoAttempts));
        let p = RetryPolicy { max_attempts: 80, ..Default::default() };
        assert_eq!(p.validate(), Err(PolicyError::Overflow { attempts: 80 }));
    }

    #[test]
    fn worst_case_saturates_instead_of_panicking() {
        let p = RetryPolicy { max_attempts: 200, attempt_timeout: Duration::MAX, ..Default::default() };
        assert_eq!(p.worst_case(), Duration::MAX);
    }
}
