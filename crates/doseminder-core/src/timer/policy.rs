//! Timing policy for automatic dose resolution.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Delays that drive the grace and auto-resolve timers.
///
/// Both delays are measured from the moment the dose became due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionPolicy {
    /// Silence within this window is read as the dose having been taken.
    pub grace: Duration,
    /// After this window an unresolved dose is forced to a terminal state.
    pub auto_resolve: Duration,
    /// Minimum spacing between opportunistic retries of a failed automatic call.
    pub retry_cooldown: Duration,
    /// Countdown refresh period.
    pub tick: Duration,
}

impl Default for ResolutionPolicy {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(5 * 60),
            auto_resolve: Duration::from_secs(40 * 60),
            retry_cooldown: Duration::from_secs(30),
            tick: Duration::from_secs(1),
        }
    }
}

impl ResolutionPolicy {
    /// # Errors
    /// Returns an error if a delay is zero or the auto-resolve window does
    /// not outlast the grace window.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grace.is_zero() {
            return Err(invalid("policy.grace_minutes", "must be positive"));
        }
        if self.auto_resolve <= self.grace {
            return Err(invalid(
                "policy.auto_resolve_minutes",
                "must be longer than the grace window",
            ));
        }
        if self.tick.is_zero() {
            return Err(invalid("policy.tick_millis", "must be positive"));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
