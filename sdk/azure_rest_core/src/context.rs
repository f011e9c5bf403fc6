//! Per-call execution context.
//!
//! A [`Context`] travels with a single logical call through every policy of
//! the pipeline. It carries the cancellation signal, an optional deadline,
//! and a small bag of string values that policies may read (for example a
//! caller-supplied client request id).

use crate::error::{RestError, RestResult};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Context key read by [`RequestIdPolicy`](crate::policy::RequestIdPolicy).
pub const CLIENT_REQUEST_ID_KEY: &str = "client-request-id";

/// Cancellation, deadline, and values for one logical call.
///
/// Cloning is cheap; clones share the same cancellation token.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancellation: CancellationToken,
    deadline: Option<Instant>,
    values: Arc<HashMap<String, String>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an existing cancellation token, e.g. one shared by several calls.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Abort the call once `timeout` has elapsed from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Abort the call at `deadline`. An earlier deadline already set wins.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.values).insert(key.into(), value.into());
        self
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Token that cancels this call when triggered.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fail with [`RestError::Cancelled`] if the call may not proceed.
    pub fn check(&self) -> RestResult<()> {
        if self.cancellation.is_cancelled() {
            return Err(RestError::cancelled("operation was cancelled"));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(RestError::cancelled("deadline elapsed"));
        }
        Ok(())
    }

    /// Drive `fut` to completion unless the call is cancelled or its deadline
    /// passes first, in which case `fut` is dropped.
    pub async fn run<T, F>(&self, fut: F) -> RestResult<T>
    where
        F: Future<Output = RestResult<T>>,
    {
        self.check()?;

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(RestError::cancelled("operation was cancelled")),
            _ = deadline => Err(RestError::cancelled("deadline elapsed")),
            result = fut => result,
        }
    }

    /// Sleep for `duration`, waking early with an error on cancellation.
    pub async fn sleep(&self, duration: Duration) -> RestResult<()> {
        self.run(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_are_copied_on_write() {
        let parent = Context::new().with_value("a", "1");
        let child = parent.clone().with_value("b", "2");

        assert_eq!(parent.value("a"), Some("1"));
        assert_eq!(parent.value("b"), None);
        assert_eq!(child.value("a"), Some("1"));
        assert_eq!(child.value("b"), Some("2"));
    }

    #[test]
    fn clones_share_cancellation() {
        let ctx = Context::new();
        let clone = ctx.clone();
        clone.cancel();

        assert!(ctx.is_cancelled());
        assert!(matches!(ctx.check(), Err(RestError::Cancelled(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn earlier_deadline_wins() {
        let now = Instant::now();
        let ctx = Context::new()
            .with_deadline(now + Duration::from_secs(5))
            .with_deadline(now + Duration::from_secs(10));

        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_at_deadline() {
        let ctx = Context::new().with_timeout(Duration::from_millis(100));

        let result: RestResult<()> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;

        match result {
            Err(RestError::Cancelled(reason)) => assert_eq!(reason, "deadline elapsed"),
            other => panic!("expected Cancelled, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let ctx = Context::new();
        let trigger = ctx.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result: RestResult<()> = ctx.run(std::future::pending()).await;
        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn run_returns_inner_result() {
        let ctx = Context::new();
        let value = ctx.run(async { Ok(42) }).await.unwrap();
        assert_eq!(value, 42);
    }
}
