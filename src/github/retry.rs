//! Retry and back-off for Forge API calls.
//!
//! Transient errors retry with exponential backoff (3 retries with 2s, 4s,
//! 8s delays by default). Rate-limit exhaustion sleeps until the reset
//! instant reported by the Forge; abuse-limit responses sleep a fixed 10
//! seconds. Limit sleeps do not consume the transient retry budget, but are
//! bounded separately so a persistently hostile response cannot loop forever.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;

use super::error::{ForgeError, ForgeErrorKind};

/// Fixed back-off after an abuse-limit response.
pub const ABUSE_LIMIT_BACKOFF: Duration = Duration::from_secs(10);

/// Fallback sleep when a rate-limited response carries no reset instant.
const RATE_LIMIT_FALLBACK_SLEEP: Duration = Duration::from_secs(60);

/// Upper bound on limit-induced sleeps within one logical operation.
const MAX_LIMIT_SLEEPS: u32 = 5;

/// Configuration for exponential backoff retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,

    /// Initial delay before the first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retries (cap for exponential growth).
    pub max_delay: Duration,

    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Default retry configuration: 3 retries with 2s, 4s, 8s delays.
    pub const DEFAULT: Self = Self {
        max_retries: 3,
        initial_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(16),
        backoff_multiplier: 2.0,
    };

    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Computes the delay for the given retry attempt (0-indexed), growing
    /// exponentially and capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.powi(attempt as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Executes an async Forge operation with retry and limit handling.
///
/// - `Transient` errors retry with exponential backoff until the budget is
///   exhausted, then surface the last error.
/// - `RateLimited` errors sleep until the reset instant (or a fallback
///   minute) and retry.
/// - `AbuseLimited` errors sleep [`ABUSE_LIMIT_BACKOFF`] and retry.
/// - `Permanent` errors are returned immediately.
pub async fn retry_forge_call<T, F, Fut>(config: RetryConfig, mut operation: F) -> Result<T, ForgeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ForgeError>>,
{
    let mut transient_attempts = 0;
    let mut limit_sleeps = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => match e.kind {
                ForgeErrorKind::Permanent => return Err(e),
                ForgeErrorKind::Transient => {
                    transient_attempts += 1;
                    if transient_attempts > config.max_retries {
                        return Err(e);
                    }
                    let delay = config.delay_for_attempt(transient_attempts - 1);
                    tracing::debug!(
                        attempt = transient_attempts,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "transient Forge error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                ForgeErrorKind::RateLimited => {
                    limit_sleeps += 1;
                    if limit_sleeps > MAX_LIMIT_SLEEPS {
                        return Err(e);
                    }
                    let sleep = e
                        .reset_at
                        .and_then(|reset| (reset - Utc::now()).to_std().ok())
                        .unwrap_or(RATE_LIMIT_FALLBACK_SLEEP);
                    tracing::info!(
                        sleep_secs = sleep.as_secs(),
                        reset_at = ?e.reset_at,
                        "rate limit exhausted, sleeping until reset"
                    );
                    tokio::time::sleep(sleep).await;
                }
                ForgeErrorKind::AbuseLimited => {
                    limit_sleeps += 1;
                    if limit_sleeps > MAX_LIMIT_SLEEPS {
                        return Err(e);
                    }
                    tracing::warn!(
                        sleep_secs = ABUSE_LIMIT_BACKOFF.as_secs(),
                        "abuse limit reached, backing off"
                    );
                    tokio::time::sleep(ABUSE_LIMIT_BACKOFF).await;
                }
            },
        }
    }
}
