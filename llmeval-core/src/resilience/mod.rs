// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Retry policy with exponential backoff for calls to unreliable backends.
//!
//! The policy wraps a fallible async operation and re-runs it until it
//! succeeds, returns a permanent error, or the attempt budget is spent.
//! [`RetryPolicy::execute_parsed`] treats "call the backend" and "parse what
//! it returned" as a single unit: a parse failure causes a fresh call, since a
//! non-deterministic backend may produce parseable output on the next try.

use rand::random;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Classifies failures as worth retrying or not.
///
/// Misconfiguration (an unknown backend, a rejected credential) should return
/// `false` so the policy fails immediately instead of sleeping.
pub trait Retryable {
    fn is_retryable(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// Three attempts, 1s base delay doubling up to 4s, no jitter
    pub fn exponential() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Relative jitter in `[0, 1]` applied to each delay
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Wait before retry number `attempt` (1 = the wait after the first failure).
    ///
    /// `min(max_delay, base_delay * multiplier^(attempt - 1))`, jittered.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let jittered = if self.jitter > 0.0 {
            base * (1.0 + (random::<f64>() - 0.5) * 2.0 * self.jitter)
        } else {
            base
        };
        let clamped = jittered.min(self.max_delay.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(clamped)
    }

    /// Run `operation` until it succeeds or the budget is exhausted.
    ///
    /// The closure receives the 1-based attempt number.
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Retryable + 'static,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => {
                    debug!(attempt, error = %e, "Permanent failure, not retrying");
                    return Err(RetryError::Permanent(e));
                }
                Err(e) if attempt >= max_attempts => {
                    warn!(attempts = attempt, error = %e, "Retry budget exhausted");
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }
                Err(e) => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Retry a backend call and the parsing of its output as one unit
    pub async fn execute_parsed<C, CFut, R, P, T, E>(
        &self,
        mut call: C,
        parse: P,
    ) -> Result<T, RetryError<E>>
    where
        C: FnMut() -> CFut,
        CFut: Future<Output = Result<R, E>>,
        P: Fn(R) -> Result<T, E>,
        E: std::error::Error + Retryable + 'static,
    {
        let parse = &parse;
        self.execute(|_| {
            let pending = call();
            async move {
                let raw = pending.await?;
                parse(raw)
            }
        })
        .await
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E: std::error::Error + 'static> {
    #[error("Non-retryable failure: {0}")]
    Permanent(#[source] E),

    #[error("All {attempts} retry attempts exhausted. Last error: {last_error}")]
    Exhausted {
        attempts: u32,
        #[source]
        last_error: E,
    },
}

impl<E: std::error::Error + 'static> RetryError<E> {
    /// The underlying error of the final attempt
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Permanent(e) => e,
            RetryError::Exhausted { last_error, .. } => last_error,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Error)]
    enum StubError {
        #[error("flaky: {0}")]
        Flaky(String),
        #[error("unknown backend")]
        Misconfigured,
    }

    impl Retryable for StubError {
        fn is_retryable(&self) -> bool {
            !matches!(self, StubError::Misconfigured)
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::exponential()
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(2))
    }

    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::exponential();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        // capped
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(4));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::exponential()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(10))
            .with_jitter(0.1);
        for _ in 0..50 {
            let delay = policy.delay_for_attempt(1).as_secs_f64();
            assert!((0.09..=0.11).contains(&delay), "delay {delay}");
        }
    }

    #[tokio::test]
    async fn test_fails_twice_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = fast_policy()
            .execute(|_| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(StubError::Flaky(format!("call {n}")))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unparseable_output_exhausts_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<serde_json::Value, _> = fast_policy()
            .execute_parsed(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, StubError>("NOT JSON".to_string()) }
                },
                |raw| serde_json::from_str(&raw).map_err(|e| StubError::Flaky(e.to_string())),
            )
            .await;

        let err = result.unwrap_err();
        assert!(err.is_exhausted());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, RetryError::Exhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_parse_failure_triggers_fresh_call() {
        let calls = AtomicU32::new(0);
        let result = fast_policy()
            .execute_parsed(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        Ok::<_, StubError>(if n == 0 { "garbage" } else { r#"{"ok": true}"# })
                    }
                },
                |raw| {
                    serde_json::from_str::<serde_json::Value>(raw)
                        .map_err(|e| StubError::Flaky(e.to_string()))
                },
            )
            .await
            .unwrap();

        assert_eq!(result["ok"], true);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy()
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StubError::Misconfigured) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Permanent(StubError::Misconfigured))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_carries_last_error() {
        let result: Result<(), _> = fast_policy()
            .with_max_attempts(2)
            .execute(|attempt| async move { Err(StubError::Flaky(format!("attempt {attempt}"))) })
            .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("attempt 2"));
        assert_eq!(err.into_inner().to_string(), "flaky: attempt 2");
    }
}
