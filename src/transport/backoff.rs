//! Reconnect policies
//!
//! A policy is configuration; [`Backoff`] is the per-endpoint state that
//! hands out delays until the budget is spent.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a client waits between reconnect attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "lowercase")]
pub enum ReconnectPolicy {
    /// Constant delay, retried forever
    Fixed { delay_secs: f64 },
    /// Delay grows by `multiplier` up to `cap_secs`; gives up after `max_attempts` retries
    Exponential {
        initial_secs: f64,
        multiplier: f64,
        cap_secs: f64,
        max_attempts: u32,
    },
}

impl ReconnectPolicy {
    /// Interactive operator: retry every second, forever
    pub fn operator_default() -> Self {
        ReconnectPolicy::Fixed { delay_secs: 1.0 }
    }

    /// Recorder: 2 s doubling to a 10 s cap, 10 attempts
    pub fn recorder_default() -> Self {
        ReconnectPolicy::Exponential {
            initial_secs: 2.0,
            multiplier: 2.0,
            cap_secs: 10.0,
            max_attempts: 10,
        }
    }

    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        match *self {
            ReconnectPolicy::Fixed { delay_secs } => {
                if !(delay_secs.is_finite() && delay_secs >= 0.0) {
                    return Err("Fixed reconnect delay must be a non-negative number".into());
                }
            }
            ReconnectPolicy::Exponential {
                initial_secs,
                multiplier,
                cap_secs,
                max_attempts,
            } => {
                if !(initial_secs.is_finite() && initial_secs > 0.0) {
                    return Err("Exponential reconnect initial_secs must be positive".into());
                }
                if !(multiplier.is_finite() && multiplier >= 1.0) {
                    return Err("Exponential reconnect multiplier must be >= 1".into());
                }
                if !cap_secs.is_finite() || cap_secs < initial_secs {
                    return Err("Exponential reconnect cap_secs must be >= initial_secs".into());
                }
                if max_attempts == 0 {
                    return Err("Exponential reconnect max_attempts must be non-zero".into());
                }
            }
        }
        Ok(())
    }
}

/// Retry state for one endpoint
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempts: 0 }
    }

    /// Retries handed out since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay before the next attempt, or `None` once the budget is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = match self.policy {
            ReconnectPolicy::Fixed { delay_secs } => delay_secs,
            ReconnectPolicy::Exponential {
                initial_secs,
                multiplier,
                cap_secs,
                max_attempts,
            } => {
                if self.attempts >= max_attempts {
                    return None;
                }
                let exp = i32::try_from(self.attempts).unwrap_or(i32::MAX);
                (initial_secs * multiplier.powi(exp)).min(cap_secs)
            }
        };
        self.attempts = self.attempts.saturating_add(1);
        // Negative and NaN delays retry immediately; overflow waits the longest
        Some(Duration::try_from_secs_f64(delay.max(0.0)).unwrap_or(Duration::MAX))
    }

    /// Start over after a successful connection
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(delays: &[Duration]) -> Vec<u64> {
        delays.iter().map(|d| d.as_secs()).collect()
    }

    #[test]
    fn bounded_policy_yields_capped_sequence_then_gives_up() {
        let mut backoff = Backoff::new(ReconnectPolicy::recorder_default());
        let delays: Vec<Duration> = std::iter::from_fn(|| backoff.next_delay()).collect();
        assert_eq!(secs(&delays), vec![2, 4, 8, 10, 10, 10, 10, 10, 10, 10]);
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempts(), 10);
    }

    #[test]
    fn fixed_policy_never_gives_up() {
        let mut backoff = Backoff::new(ReconnectPolicy::operator_default());
        for _ in 0..1000 {
            assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
        }
    }

    #[test]
    fn reset_restarts_the_sequence() {
        let mut backoff = Backoff::new(ReconnectPolicy::recorder_default());
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn invalid_delays_do_not_panic() {
        let mut negative = Backoff::new(ReconnectPolicy::Fixed { delay_secs: -1.0 });
        assert_eq!(negative.next_delay(), Some(Duration::ZERO));

        let mut nan = Backoff::new(ReconnectPolicy::Fixed { delay_secs: f64::NAN });
        assert_eq!(nan.next_delay(), Some(Duration::ZERO));

        let mut huge = Backoff::new(ReconnectPolicy::Exponential {
            initial_secs: f64::INFINITY,
            multiplier: 2.0,
            cap_secs: f64::INFINITY,
            max_attempts: 1,
        });
        assert_eq!(huge.next_delay(), Some(Duration::MAX));
    }

    #[test]
    fn validate_rejects_inverted_cap() {
        let policy = ReconnectPolicy::Exponential {
            initial_secs: 5.0,
            multiplier: 2.0,
            cap_secs: 1.0,
            max_attempts: 3,
        };
        assert!(policy.validate().is_err());
        assert!(ReconnectPolicy::recorder_default().validate().is_ok());
    }

    #[test]
    fn policy_toml_shape() {
        let policy: ReconnectPolicy = toml::from_str(
            "policy = \"exponential\"\ninitial_secs = 2.0\nmultiplier = 2.0\ncap_secs = 10.0\nmax_attempts = 10\n",
        )
        .unwrap();
        assert_eq!(policy, ReconnectPolicy::recorder_default());
    }
}
