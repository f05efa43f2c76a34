//! C10: Resilience Envelope (spec.md §4.10) — rate limiter → circuit
//! breaker → retry (jittered exponential backoff) → recovery hook, in
//! that order on the call path. Every remote-facing connector operation
//! goes through [`ResilienceEnvelope::call`].

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::errors::{Result, SqlFlowError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitStrategy {
    Wait,
    FailFast,
}

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub max_requests_per_minute: u32,
    pub burst_size: u32,
    pub strategy: RateLimitStrategy,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 300,
            burst_size: 10,
            strategy: RateLimitStrategy::Wait,
        }
    }
}

struct TokenBucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket rate limiter. `acquire` either waits for a token to refill
/// or fails fast, per `strategy`.
struct TokenBucket {
    config: RateLimiterConfig,
    state: Mutex<TokenBucketState>,
}

impl TokenBucket {
    fn new(config: RateLimiterConfig) -> Self {
        let burst = config.burst_size as f64;
        Self {
            state: Mutex::new(TokenBucketState {
                tokens: burst,
                last_refill: Instant::now(),
            }),
            config,
        }
    }

    fn refill_rate_per_sec(&self) -> f64 {
        self.config.max_requests_per_minute as f64 / 60.0
    }

    async fn acquire(&self) -> Result<()> {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_rate_per_sec())
                    .min(self.config.burst_size as f64);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - state.tokens;
                    Some(Duration::from_secs_f64(deficit / self.refill_rate_per_sec()))
                }
            };
            match wait {
                None => return Ok(()),
                Some(delay) => {
                    if self.config.strategy == RateLimitStrategy::FailFast {
                        return Err(SqlFlowError::ConnectorRuntimeError {
                            connector: "resilience".to_string(),
                            message: "rate limit exhausted (fail-fast strategy)".to_string(),
                        });
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

struct CircuitInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

/// Closed → Open after `failure_threshold` consecutive countable
/// failures; Open → HalfOpen after `recovery_timeout` elapses; HalfOpen →
/// Closed after `success_threshold` consecutive successes, else → Open.
struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitInner>,
}

impl CircuitBreaker {
    fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
            }),
        }
    }

    async fn before_call(&self, connector: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_successes = 0;
                    Ok(())
                } else {
                    Err(SqlFlowError::CircuitOpenError(connector.to_string()))
                }
            }
        }
    }

    async fn on_success(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures = 0;
        match inner.state {
            CircuitState::Closed => {}
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_successes = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Excluded exception kinds (parameter/config errors) never reach
    /// here — only the retryable-or-not call site decides whether to
    /// count a failure at all.
    async fn on_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_successes = 0;
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::Open => {}
        }
    }

    async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Defaults for database-family connectors (spec.md §4.10).
    pub fn database_defaults() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }

    /// Defaults for REST-family connectors (spec.md §4.10).
    pub fn rest_defaults() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32 - 1);
        Duration::from_secs_f64(secs)
    }
}

/// Invoked once, after retries are exhausted, before the final failure is
/// returned (spec.md §4.10 layer 4).
#[async_trait]
pub trait RecoveryHook: Send + Sync {
    async fn recover(&self) -> Result<()>;
}

pub struct ResilienceEnvelope {
    connector_name: String,
    rate_limiter: TokenBucket,
    circuit: CircuitBreaker,
    retry: RetryConfig,
    recovery_hook: Option<Box<dyn RecoveryHook>>,
}

impl ResilienceEnvelope {
    pub fn new(
        connector_name: impl Into<String>,
        rate_limiter: RateLimiterConfig,
        circuit: CircuitBreakerConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            connector_name: connector_name.into(),
            rate_limiter: TokenBucket::new(rate_limiter),
            circuit: CircuitBreaker::new(circuit),
            retry,
            recovery_hook: None,
        }
    }

    pub fn with_recovery_hook(mut self, hook: Box<dyn RecoveryHook>) -> Self {
        self.recovery_hook = Some(hook);
        self
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.circuit.state().await
    }

    /// Runs `op`, applying rate limiting, circuit breaking, and retry with
    /// jittered exponential backoff. `op` is re-invoked on every retryable
    /// failure, so it must be safe to call more than once.
    pub async fn call<F, Fut, T>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.rate_limiter.acquire().await?;
            self.circuit.before_call(&self.connector_name).await?;

            match op().await {
                Ok(value) => {
                    self.circuit.on_success().await;
                    return Ok(value);
                }
                Err(err) => {
                    let retryable = err.is_retryable();
                    if retryable {
                        self.circuit.on_failure().await;
                    }
                    if !retryable {
                        return Err(err);
                    }
                    if attempt >= self.retry.max_attempts {
                        if let Some(hook) = &self.recovery_hook {
                            let _ = hook.recover().await;
                        }
                        return Err(SqlFlowError::RetryExhaustedError {
                            attempts: attempt,
                            message: err.to_string(),
                        });
                    }
                    let delay = self.retry.delay_for_attempt(attempt);
                    let jittered = Duration::from_secs_f64(rand::random::<f64>() * delay.as_secs_f64());
                    tokio::time::sleep(jittered).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            backoff_multiplier: 2.0,
        }
    }

    fn permissive_rate_limiter() -> RateLimiterConfig {
        RateLimiterConfig {
            max_requests_per_minute: 10_000,
            burst_size: 10_000,
            strategy: RateLimitStrategy::Wait,
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let envelope = ResilienceEnvelope::new(
            "test",
            permissive_rate_limiter(),
            CircuitBreakerConfig::default(),
            fast_retry(),
        );
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();
        let result: Result<u32> = envelope
            .call(|| {
                let attempts = attempts_clone.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(SqlFlowError::ConnectorRuntimeError {
                            connector: "test".into(),
                            message: "timeout".into(),
                        })
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_propagate_immediately() {
        let envelope = ResilienceEnvelope::new(
            "test",
            permissive_rate_limiter(),
            CircuitBreakerConfig::default(),
            fast_retry(),
        );
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();
        let result: Result<()> = envelope
            .call(|| {
                let attempts = attempts_clone.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(SqlFlowError::ParameterError("bad param".into()))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_exhaustion_reports_attempt_count() {
        let envelope = ResilienceEnvelope::new(
            "test",
            permissive_rate_limiter(),
            CircuitBreakerConfig::default(),
            fast_retry(),
        );
        let result: Result<()> = envelope
            .call(|| async {
                Err(SqlFlowError::ConnectorRuntimeError {
                    connector: "test".into(),
                    message: "down".into(),
                })
            })
            .await;
        match result.unwrap_err() {
            SqlFlowError::RetryExhaustedError { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected RetryExhaustedError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn circuit_opens_after_threshold_and_blocks_calls() {
        let envelope = ResilienceEnvelope::new(
            "test",
            permissive_rate_limiter(),
            CircuitBreakerConfig {
                failure_threshold: 2,
                recovery_timeout: Duration::from_secs(60),
                success_threshold: 1,
            },
            RetryConfig {
                max_attempts: 1,
                initial_delay: Duration::from_millis(1),
                backoff_multiplier: 1.0,
            },
        );
        for _ in 0..2 {
            let _: Result<()> = envelope
                .call(|| async {
                    Err(SqlFlowError::ConnectorRuntimeError {
                        connector: "test".into(),
                        message: "down".into(),
                    })
                })
                .await;
        }
        assert_eq!(envelope.circuit_state().await, CircuitState::Open);
        let result: Result<()> = envelope.call(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(SqlFlowError::CircuitOpenError(_))));
    }
}
