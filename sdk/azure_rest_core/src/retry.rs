//! Retry policy for transient failures.

use crate::context::Context;
use crate::error::RestResult;
use crate::policy::{Next, Policy};
use crate::request::{Request, Response};
use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use std::time::Duration;

/// Status codes retried by default.
///
/// - 408 Request Timeout
/// - 429 Too Many Requests (rate limiting)
/// - 500 Internal Server Error
/// - 502 Bad Gateway
/// - 503 Service Unavailable
/// - 504 Gateway Timeout
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Whether `status` is in [`DEFAULT_RETRYABLE_STATUSES`].
#[inline]
pub fn is_retriable_status(status: u16) -> bool {
    DEFAULT_RETRYABLE_STATUSES.contains(&status)
}

/// How long to wait between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelayStrategy {
    /// The same delay before every retry.
    Fixed(Duration),
    /// `initial * 2^retry`, varied by ±25% jitter and capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

impl DelayStrategy {
    /// Delay before retry number `retry` (0 for the first retry).
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self {
            Self::Fixed(delay) => *delay,
            Self::Exponential { initial, max } => {
                let base = 2_u32
                    .checked_pow(retry)
                    .and_then(|factor| initial.checked_mul(factor))
                    .unwrap_or(*max)
                    .min(*max);
                // jitter_factor is in range [0.75, 1.25] for ±25% variation
                let jitter = 0.75 + fastrand::f64() * 0.5;
                base.mul_f64(jitter).min(*max)
            }
        }
    }

    /// Upper bound for a server-requested delay. `Fixed` honours hints as sent.
    pub fn max_delay(&self) -> Option<Duration> {
        match self {
            Self::Fixed(_) => None,
            Self::Exponential { max, .. } => Some(*max),
        }
    }
}

/// Configuration for the standard [`RetryPolicy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOptions {
    /// Maximum number of retry attempts (not counting the initial request).
    pub max_retries: u32,
    pub delay: DelayStrategy,
    /// Response statuses that trigger a retry.
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: DelayStrategy::Exponential {
                initial: Duration::from_millis(800),
                max: Duration::from_secs(60),
            },
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
        }
    }
}

impl RetryOptions {
    /// Exponential backoff with jitter.
    pub fn exponential(max_retries: u32, initial: Duration, max: Duration) -> Self {
        Self {
            max_retries,
            delay: DelayStrategy::Exponential { initial, max },
            ..Self::default()
        }
    }

    /// The same delay before every retry.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay: DelayStrategy::Fixed(delay),
            ..Self::default()
        }
    }

    pub fn with_retryable_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_statuses = statuses.into_iter().collect();
        self
    }

    pub fn should_retry_status(&self, status: StatusCode) -> bool {
        self.retryable_statuses.contains(&status.as_u16())
    }
}

/// Retries transport errors and retryable statuses with backoff.
///
/// Each attempt runs the rest of the chain on a fresh copy of the request as
/// it entered this policy, so policies below (authentication in particular)
/// start from scratch and sign every attempt anew. Only the last response is
/// returned.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    options: RetryOptions,
}

impl RetryPolicy {
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RetryOptions {
        &self.options
    }
}

#[async_trait]
impl Policy for RetryPolicy {
    async fn send(
        &self,
        ctx: &Context,
        request: &mut Request,
        next: Next<'_>,
    ) -> RestResult<Response> {
        let started = std::time::Instant::now();
        let mut retry: u32 = 0;

        loop {
            ctx.check()?;

            let mut attempt = request.clone();
            let outcome = next.run(ctx, &mut attempt).await;

            let retry_hint = match &outcome {
                Ok(response) if self.options.should_retry_status(response.status()) => {
                    Some(retry_after(response.headers()))
                }
                Err(err) if err.is_retriable() => Some(None),
                _ => None,
            };
            let Some(server_delay) = retry_hint else {
                return outcome;
            };

            if retry >= self.options.max_retries {
                tracing::warn!(
                    attempts = retry + 1,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "retries exhausted"
                );
                return outcome.map_err(|err| err.with_attempts(retry + 1));
            }

            let delay = match (server_delay, self.options.delay.max_delay()) {
                (Some(hint), Some(max)) if hint > max => {
                    tracing::warn!(
                        requested_ms = hint.as_millis() as u64,
                        max_ms = max.as_millis() as u64,
                        "server retry delay exceeds maximum, capping"
                    );
                    max
                }
                (Some(hint), _) => hint,
                (None, _) => self.options.delay.delay_for(retry),
            };
            match &outcome {
                Ok(response) => tracing::warn!(
                    attempt = retry + 1,
                    status = response.status().as_u16(),
                    delay_ms = delay.as_millis() as u64,
                    "retrying after retriable status"
                ),
                Err(err) => tracing::warn!(
                    attempt = retry + 1,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after transport error"
                ),
            }

            drop(outcome);
            ctx.sleep(delay).await?;
            retry += 1;
        }
    }
}

/// Server-requested delay from `retry-after-ms`, `x-ms-retry-after-ms`, or
/// `Retry-After` (delta seconds or an HTTP date).
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    for name in ["retry-after-ms", "x-ms-retry-after-ms"] {
        if let Some(ms) = header_str(headers, name).and_then(|v| v.trim().parse::<u64>().ok()) {
            return Some(Duration::from_millis(ms));
        }
    }

    let value = header_str(headers, "retry-after")?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let wait = date.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
