//! Caller-side retry for command sessions.
//!
//! A session never retries on its own. [`send_with_retry`] runs a fresh
//! [`CommandSession`] per attempt and stops at the first result that is not
//! worth repeating.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use blecmd_core::{MockTransport, RetryConfig, SessionConfig, send_with_retry};
//! use blecmd_types::{CommandDescriptor, PeripheralAddress};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(MockTransport::machine());
//! let address = PeripheralAddress::new("AA:BB:CC:DD:EE:FF")?;
//!
//! let outcome = send_with_retry(
//!     transport,
//!     &address,
//!     &CommandDescriptor::machine_sleep(),
//!     SessionConfig::default(),
//!     &RetryConfig::new(3),
//! )
//! .await?;
//! println!("{} after {} attempt(s)", outcome.report.result, outcome.attempts);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use blecmd_types::{CommandDescriptor, PeripheralAddress};

use crate::error::{Error, Result};
use crate::session::{CommandSession, SessionConfig, SessionReport};
use crate::transport::SharedTransport;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total number of sessions to try (1 means no retries).
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Backoff multiplier (1.0 = constant delay, 2.0 = double each time).
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a retry config making at most `max_attempts` attempts.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// A single attempt.
    pub fn none() -> Self {
        Self::new(1)
    }

    /// Retry settings for a peripheral that may be waking from sleep.
    ///
    /// Connections to a sleeping machine often fail once before the radio
    /// is fully up, so waits are longer.
    pub fn for_wake() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Set the number of attempts.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set initial delay.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier.
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

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::invalid_config("max_attempts must be at least 1"));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(Error::invalid_config("backoff_multiplier must be >= 1.0"));
        }
        if self.initial_delay > self.max_delay {
            return Err(Error::invalid_config(
                "initial_delay must not exceed max_delay",
            ));
        }
        Ok(())
    }

    /// Delay after the given zero-based failed attempt.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped_delay = base_delay.min(self.max_delay.as_secs_f64());

        let final_delay = if self.jitter {
            // Up to 25% extra
            let jitter_factor = 1.0 + (rand::rng().random::<f64>() * 0.25);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::from_secs_f64(final_delay)
    }
}

/// Final report of a retried send.
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    /// Report of the last session run.
    pub report: SessionReport,
    /// Sessions run, including the last.
    pub attempts: u32,
}

/// Send `command` to `address`, retrying retryable results.
///
/// Each attempt is a new [`CommandSession`] with `session` timing. Returns
/// `Err` only for invalid configuration.
#[tracing::instrument(level = "info", skip_all, fields(address = %address, max_attempts = retry.max_attempts))]
pub async fn send_with_retry(
    transport: SharedTransport,
    address: &PeripheralAddress,
    command: &CommandDescriptor,
    session: SessionConfig,
    retry: &RetryConfig,
) -> Result<RetryOutcome> {
    session.validate()?;
    retry.validate()?;

    let mut attempt = 0;
    loop {
        attempt += 1;
        let report = CommandSession::new(Arc::clone(&transport), address.clone(), command.clone())
            .with_config(session)
            .run()
            .await;

        if report.result.is_success() {
            if attempt > 1 {
                debug!("Command delivered after {} attempts", attempt);
            }
            return Ok(RetryOutcome {
                report,
                attempts: attempt,
            });
        }

        if !report.result.is_retryable() || attempt >= retry.max_attempts {
            return Ok(RetryOutcome {
                report,
                attempts: attempt,
            });
        }

        let delay = retry.delay_for_attempt(attempt - 1);
        warn!(
            result = %report.result,
            "Attempt {}/{} failed, retrying in {:?}",
            attempt,
            retry.max_attempts,
            delay
        );
        sleep(delay).await;
    }
}
