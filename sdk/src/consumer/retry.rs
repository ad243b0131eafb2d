use crate::error::AuctionError;
use crate::utils::duration::AuctionDuration;
use crate::validatable::Validatable;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use std::fmt::{Display, Formatter};

/// Bounded exponential backoff applied to retryable sink failures.
///
/// `max_attempts` counts every apply of the same event, the first one included.
/// Once exhausted, the event halts its partition.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde_as(as = "DisplayFromStr")]
    pub initial_delay: AuctionDuration,
    pub multiplier: f64,
    #[serde_as(as = "DisplayFromStr")]
    pub max_delay: AuctionDuration,
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            initial_delay: AuctionDuration::from_millis(100),
            multiplier: 2.0,
            max_delay: AuctionDuration::from_millis(5_000),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Sleep after the failed attempt with the given 1-based number.
    pub fn delay(&self, attempt: u32) -> AuctionDuration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        self.initial_delay
            .scale_capped(self.multiplier.powi(exponent), self.max_delay)
    }

    pub fn allows_retry(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max_attempts) => attempt < max_attempts,
            None => true,
        }
    }
}

impl Validatable<AuctionError> for RetryPolicy {
    fn validate(&self) -> Result<(), AuctionError> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(AuctionError::InvalidConfiguration(format!(
                "retry multiplier must be at least 1, got: {}",
                self.multiplier
            )));
        }

        if self.initial_delay > self.max_delay {
            return Err(AuctionError::InvalidConfiguration(format!(
                "retry initial delay: {} exceeds max delay: {}",
                self.initial_delay, self.max_delay
            )));
        }

        if self.max_attempts == Some(0) {
            return Err(AuctionError::InvalidConfiguration(
                "retry max attempts must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Display for RetryPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{ initial_delay: {}, multiplier: {}, max_delay: {}, max_attempts: {} }}",
            self.initial_delay,
            self.multiplier,
            self.max_delay,
            self.max_attempts
                .map(|attempts| attempts.to_string())
                .unwrap_or_else(|| "unlimited".to_string())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_should_grow_exponentially_up_to_the_cap() {
        let policy = RetryPolicy {
            initial_delay: AuctionDuration::from_millis(100),
            multiplier: 2.0,
            max_delay: AuctionDuration::from_millis(500),
            max_attempts: None,
        };
        assert_eq!(policy.delay(1).as_millis(), 100);
        assert_eq!(policy.delay(2).as_millis(), 200);
        assert_eq!(policy.delay(3).as_millis(), 400);
        assert_eq!(policy.delay(4).as_millis(), 500);
        assert_eq!(policy.delay(1_000).as_millis(), 500);
    }

    #[test]
    fn max_attempts_should_bound_retries() {
        let policy = RetryPolicy {
            max_attempts: Some(3),
            ..Default::default()
        };
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
        assert!(RetryPolicy::default().allows_retry(u32::MAX));
    }

    #[test]
    fn invalid_policies_should_be_rejected() {
        let shrinking = RetryPolicy {
            multiplier: 0.5,
            ..Default::default()
        };
        assert!(shrinking.validate().is_err());

        let inverted = RetryPolicy {
            initial_delay: AuctionDuration::from_millis(10_000),
            ..Default::default()
        };
        assert!(inverted.validate().is_err());

        let no_attempts = RetryPolicy {
            max_attempts: Some(0),
            ..Default::default()
        };
        assert!(no_attempts.validate().is_err());
        assert!(RetryPolicy::default().validate().is_ok());
    }

    #[test]
    fn policy_should_deserialize_from_human_readable_durations() {
        let policy: RetryPolicy = serde_json::from_str(
            r#"{"initial_delay":"250ms","multiplier":1.5,"max_delay":"10s","max_attempts":5}"#,
        )
        .unwrap();
        assert_eq!(policy.initial_delay.as_millis(), 250);
        assert_eq!(policy.max_delay.as_millis(), 10_000);
        assert_eq!(policy.max_attempts, Some(5));
    }
}
