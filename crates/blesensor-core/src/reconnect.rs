//! Reconnection policy for the connection manager.
//!
//! The state machine never reconnects on its own; [`BtleplugLink`](crate::BtleplugLink)
//! consults these options after a link loss.

use std::time::Duration;

use rand::Rng;

use crate::error::{Error, Result};

/// Options for automatic reconnection.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectOptions {
    /// Maximum number of reconnection attempts (None = unlimited).
    pub max_attempts: Option<u32>,
    /// Initial delay before first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (for exponential backoff).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to use exponential backoff.
    pub use_exponential_backoff: bool,
    /// Whether to add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            use_exponential_backoff: true,
            jitter: true,
        }
    }
}

impl ReconnectOptions {
    /// Create new reconnect options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Never reconnect after a link loss.
    pub fn disabled() -> Self {
        Self {
            max_attempts: Some(0),
            ..Default::default()
        }
    }

    /// Create options with a fixed delay (no backoff, no jitter).
    pub fn fixed_delay(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay.max(Duration::from_secs(60)),
            use_exponential_backoff: false,
            jitter: false,
            ..Default::default()
        }
    }

    /// Set maximum number of reconnection attempts.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Set initial delay before first reconnection attempt.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay between attempts.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier for exponential backoff.
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Whether another attempt is allowed after `attempts` failed ones.
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt <= max)
    }

    /// Calculate delay for a given attempt number, starting at zero.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = if self.use_exponential_backoff {
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32)
        } else {
            self.initial_delay.as_secs_f64()
        };
        let capped = base.min(self.max_delay.as_secs_f64());

        let delay = if self.jitter {
            // Add up to 25% jitter
            capped * (1.0 + rand::rng().random::<f64>() * 0.25)
        } else {
            capped
        };
        Duration::from_secs_f64(delay)
    }

    /// Validate the options and return an error if invalid.
    ///
    /// Checks that:
    /// - `backoff_multiplier` is >= 1.0
    /// - `initial_delay` is > 0
    /// - `max_delay` >= `initial_delay`
    pub fn validate(&self) -> Result<()> {
        if !(self.backoff_multiplier >= 1.0) {
            return Err(Error::invalid_config("backoff_multiplier must be >= 1.0"));
        }
        if self.initial_delay.is_zero() {
            return Err(Error::invalid_config("initial_delay must be > 0"));
        }
        if self.max_delay < self.initial_delay {
            return Err(Error::invalid_config("max_delay must be >= initial_delay"));
        }
        Ok(())
    }
}
