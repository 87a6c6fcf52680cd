//! Retry provider - decorator that adds automatic retry with exponential backoff.
//!
//! Wraps any [`LLMProvider`] to transparently retry transient errors such as
//! rate limits, 5xx responses, provider overload and per-attempt timeouts.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use clawloop::providers::RetryProvider;
//!
//! let provider = RetryProvider::new(Arc::new(my_provider))
//!     .with_max_retries(5)
//!     .with_base_delay_ms(500)
//!     .with_attempt_timeout(Duration::from_secs(60));
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::{ClawError, ProviderError, Result};
use crate::session::Message;

use super::{ChatOptions, LLMProvider, LLMResponse, StreamEvent, ToolDefinition};

/// Patterns in untyped error messages that indicate a transient failure.
const RETRYABLE_PATTERNS: &[&str] = &[
    "429",
    "500",
    "502",
    "503",
    "504",
    "rate limit",
    "rate_limit",
    "overloaded",
    "too many requests",
    "timed out",
    "timeout",
    "service unavailable",
];

/// A decorator provider that retries transient LLM errors with exponential backoff.
///
/// `max_retries` is the total attempt budget: a call is made at most that
/// many times, and always at least once. Non-transient errors
/// (authentication, invalid request, unknown model) are returned immediately.
pub struct RetryProvider {
    inner: Arc<dyn LLMProvider>,
    max_retries: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    /// Upper bound on a single attempt; `None` waits indefinitely
    attempt_timeout: Option<Duration>,
}

impl std::fmt::Debug for RetryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryProvider")
            .field("inner", &self.inner.name())
            .field("max_retries", &self.max_retries)
            .field("base_delay_ms", &self.base_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish()
    }
}

impl RetryProvider {
    /// Wrap `inner` with default settings: 3 attempts, 1s base delay, 30s cap.
    pub fn new(inner: Arc<dyn LLMProvider>) -> Self {
        Self {
            inner,
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            attempt_timeout: None,
        }
    }

    /// Wrap `inner` using a [`RetryConfig`] section.
    pub fn from_config(inner: Arc<dyn LLMProvider>, config: &RetryConfig) -> Self {
        Self::new(inner)
            .with_max_retries(if config.enabled { config.max_retries } else { 1 })
            .with_base_delay_ms(config.base_delay_ms)
            .with_max_delay_ms(config.max_delay_ms)
    }

    /// Set the total number of attempts per call (0 is treated as 1).
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base delay in milliseconds for exponential backoff.
    ///
    /// The delay before retry `n` (0-indexed) is
    /// `min(base_delay_ms * 2^n + jitter, max_delay_ms)`.
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Set the maximum delay cap in milliseconds.
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Bound each attempt; an attempt that runs over counts as a retryable timeout.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Attempt budget as configured.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn max_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        match self.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await.unwrap_or_else(|_| {
                Err(ProviderError::Timeout(format!(
                    "no response within {}ms",
                    limit.as_millis()
                ))
                .into())
            }),
            None => fut.await,
        }
    }
}

/// Check whether a [`ClawError`] represents a transient failure that should be retried.
///
/// Typed provider errors decide for themselves; untyped ones fall back to
/// substring matching.
pub fn is_retryable(err: &ClawError) -> bool {
    match err {
        ClawError::ProviderTyped(pe) => pe.is_retryable(),
        ClawError::Provider(_) | ClawError::Http(_) => {
            let msg = err.to_string().to_lowercase();
            if ["400", "401", "403", "404"]
                .iter()
                .any(|pattern| msg.contains(pattern))
            {
                return false;
            }
            RETRYABLE_PATTERNS
                .iter()
                .any(|pattern| msg.contains(pattern))
        }
        _ => false,
    }
}

/// Sleep for the backoff delay of a given retry attempt.
///
/// Jitter comes from the nanosecond component of the system clock, which is
/// enough to decorrelate concurrent retries.
pub async fn delay_with_jitter(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) {
    let jitter_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64 % (base_delay_ms.max(1)))
        .unwrap_or(0);

    let delay = compute_delay(attempt, base_delay_ms, max_delay_ms, jitter_ms);
    tokio::time::sleep(Duration::from_millis(delay)).await;
}

/// Compute the backoff delay for a given attempt (without sleeping).
pub fn compute_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64, jitter_ms: u64) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(16));
    exponential.saturating_add(jitter_ms).min(max_delay_ms)
}

#[async_trait]
impl LLMProvider for RetryProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn default_model(&self) -> &str {
        self.inner.default_model()
    }

    async fn chat(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        model: Option<&str>,
        options: ChatOptions,
    ) -> Result<LLMResponse> {
        let mut attempt = 0;
        loop {
            let result = self
                .bounded(
                    self.inner
                        .chat(messages.clone(), tools.clone(), model, options.clone()),
                )
                .await;

            match result {
                Ok(response) => return Ok(response),
                Err(err) if is_retryable(&err) && attempt + 1 < self.max_attempts() => {
                    warn!(
                        provider = self.inner.name(),
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts(),
                        error = %err,
                        "Retrying chat request after transient error"
                    );
                    delay_with_jitter(attempt, self.base_delay_ms, self.max_delay_ms).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn chat_stream(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        model: Option<&str>,
        options: ChatOptions,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        // Only establishing the stream is retried; failures mid-stream surface as events.
        let mut attempt = 0;
        loop {
            let result = self
                .bounded(self.inner.chat_stream(
                    messages.clone(),
                    tools.clone(),
                    model,
                    options.clone(),
                ))
                .await;

            match result {
                Ok(receiver) => return Ok(receiver),
                Err(err) if is_retryable(&err) && attempt + 1 < self.max_attempts() => {
                    warn!(
                        provider = self.inner.name(),
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts(),
                        error = %err,
                        "Retrying chat_stream request after transient error"
                    );
                    delay_with_jitter(attempt, self.base_delay_ms, self.max_delay_ms).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with the given error `failures` times, then succeeds.
    struct FlakyProvider {
        failures: u32,
        error: fn() -> ClawError,
        calls: AtomicU32,
        delay: Option<Duration>,
    }

    impl FlakyProvider {
        fn new(failures: u32, error: fn() -> ClawError) -> Self {
            Self {
                failures,
                error,
                calls: AtomicU32::new(0),
                delay: None,
            }
        }
    }

    #[async_trait]
    impl LLMProvider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        fn default_model(&self) -> &str {
            "flaky-1"
        }

        async fn chat(
            &self,
            _messages: Vec<Message>,
            _tools: Vec<ToolDefinition>,
            _model: Option<&str>,
            _options: ChatOptions,
        ) -> Result<LLMResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if n < self.failures {
                Err((self.error)())
            } else {
                Ok(LLMResponse::text("ok"))
            }
        }
    }

    fn rate_limited() -> ClawError {
        ProviderError::RateLimit("429".into()).into()
    }

    fn auth_failed() -> ClawError {
        ProviderError::Auth("bad key".into()).into()
    }

    #[test]
    fn test_retry_provider_defaults() {
        let provider = RetryProvider::new(Arc::new(FlakyProvider::new(0, rate_limited)));
        assert_eq!(provider.name(), "flaky");
        assert_eq!(provider.default_model(), "flaky-1");
        assert_eq!(provider.max_retries, 3);
        assert_eq!(provider.base_delay_ms, 1000);
        assert_eq!(provider.max_delay_ms, 30_000);
        assert!(provider.attempt_timeout.is_none());
    }

    #[test]
    fn test_from_config_disabled_means_single_attempt() {
        let config = RetryConfig {
            enabled: false,
            ..RetryConfig::default()
        };
        let provider =
            RetryProvider::from_config(Arc::new(FlakyProvider::new(0, rate_limited)), &config);
        assert_eq!(provider.max_retries(), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let inner = Arc::new(FlakyProvider::new(2, rate_limited));
        let provider = RetryProvider::new(inner.clone()).with_base_delay_ms(1);

        let response = provider
            .chat(vec![], vec![], None, ChatOptions::new())
            .await
            .unwrap();
        assert_eq!(response.content, "ok");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries_attempts() {
        let inner = Arc::new(FlakyProvider::new(3, rate_limited));
        let provider = RetryProvider::new(inner.clone())
            .with_max_retries(3)
            .with_base_delay_ms(1);

        let err = provider
            .chat(vec![], vec![], None, ChatOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClawError::ProviderTyped(ProviderError::RateLimit(_))
        ));
        // Three failures exhaust a budget of three; the fourth call never happens
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_budget_still_attempts_once() {
        let inner = Arc::new(FlakyProvider::new(u32::MAX, rate_limited));
        let provider = RetryProvider::new(inner.clone())
            .with_max_retries(0)
            .with_base_delay_ms(1);

        assert!(provider
            .chat(vec![], vec![], None, ChatOptions::new())
            .await
            .is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_setup_uses_same_budget() {
        let inner = Arc::new(FlakyProvider::new(u32::MAX, rate_limited));
        let provider = RetryProvider::new(inner.clone())
            .with_max_retries(2)
            .with_base_delay_ms(1);

        assert!(provider
            .chat_stream(vec![], vec![], None, ChatOptions::new())
            .await
            .is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let inner = Arc::new(FlakyProvider::new(1, auth_failed));
        let provider = RetryProvider::new(inner.clone()).with_base_delay_ms(1);

        let err = provider
            .chat(vec![], vec![], None, ChatOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClawError::ProviderTyped(ProviderError::Auth(_))));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_timeout_is_retryable() {
        let mut flaky = FlakyProvider::new(0, rate_limited);
        flaky.delay = Some(Duration::from_millis(200));
        let inner = Arc::new(flaky);
        let provider = RetryProvider::new(inner.clone())
            .with_max_retries(2)
            .with_base_delay_ms(1)
            .with_attempt_timeout(Duration::from_millis(10));

        let err = provider
            .chat(vec![], vec![], None, ChatOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClawError::ProviderTyped(ProviderError::Timeout(_))
        ));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_is_retryable_untyped() {
        assert!(is_retryable(&ClawError::Provider(
            "HTTP 503 Service Unavailable".into()
        )));
        assert!(is_retryable(&ClawError::Provider(
            "rate_limit_exceeded".into()
        )));
        assert!(!is_retryable(&ClawError::Provider(
            "HTTP 400 Bad Request".into()
        )));
        assert!(!is_retryable(&ClawError::Tool("timeout".into())));
    }

    #[test]
    fn test_compute_delay() {
        assert_eq!(compute_delay(0, 1000, 30_000, 0), 1000);
        assert_eq!(compute_delay(1, 1000, 30_000, 0), 2000);
        assert_eq!(compute_delay(3, 1000, 30_000, 50), 8050);
        assert_eq!(compute_delay(10, 1000, 30_000, 0), 30_000);
        assert_eq!(compute_delay(64, 1000, 30_000, 0), 30_000);
    }
}
