//! Bounded exponential backoff for upstream rate limits.
//!
//! Failures are normalized into [`AgentError`] where the upstream call happens,
//! so this module only has to match on [`AgentError::RateLimited`]. Every other
//! error propagates on the first attempt.
use rand::Rng;
use reqwest::header::HeaderMap;
use std::future::Future;
use std::time::Duration;

use crate::errors::{AgentError, AgentResult};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(200);

/// Retry configuration with exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry when the server sends no hint.
    pub base_delay: Duration,
    /// Ceiling for every computed or server-supplied delay.
    pub max_delay: Duration,
    /// Upper bound of the random jitter added to computed delays.
    pub max_jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_max_jitter(mut self, jitter: Duration) -> Self {
        self.max_jitter = jitter;
        self
    }

    /// Delay before retry number `retry` (zero-based).
    ///
    /// A server hint wins; otherwise `base * 2^retry` plus jitter. Either way the
    /// result never exceeds `max_delay`.
    pub fn delay_for(&self, retry: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint.min(self.max_delay);
        }

        let backoff = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(retry));
        let jitter_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };

        backoff.saturating_add(jitter).min(self.max_delay)
    }
}

/// Retry timing advertised by the server alongside a rate-limit response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryHint {
    pub after_ms: Option<u64>,
    pub after_secs: Option<u64>,
}

impl RetryHint {
    /// Read `retry-after-ms` and `retry-after` (seconds) headers
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<f64>().ok())
                .filter(|value| value.is_finite() && *value >= 0.0)
        };

        RetryHint {
            after_ms: read("retry-after-ms").map(|ms| ms.ceil() as u64),
            after_secs: read("retry-after").map(|secs| secs.ceil() as u64),
        }
    }

    /// The precise millisecond hint if present, else the seconds hint
    pub fn delay(&self) -> Option<Duration> {
        self.after_ms
            .map(Duration::from_millis)
            .or_else(|| self.after_secs.map(Duration::from_secs))
    }
}

/// Run `operation`, retrying it on rate-limit failures.
///
/// The same closure is invoked again for each retry. Non-rate-limit errors
/// propagate immediately; when retries run out the last error propagates.
pub async fn retry_on_rate_limit<T, F, Fut>(config: &RetryConfig, mut operation: F) -> AgentResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AgentResult<T>>,
{
    let mut retries = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(AgentError::RateLimited { retry_after }) if retries < config.max_retries => {
                let delay = config.delay_for(retries, retry_after);
                retries += 1;
                tracing::warn!(
                    attempt = retries,
                    max_retries = config.max_retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "upstream rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                if err.is_rate_limited() {
                    tracing::error!(retries, "rate limit retries exhausted");
                }
                return Err(err);
            }
        }
    }
}
