//! Retry Logic
//!
//! Exponential backoff retry with jitter for identity operations. The
//! lifecycle manager never retries on its own; callers opt in through this
//! executor for errors classified as retryable.

use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{IdentityError, NetworkError};

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Initial delay before first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Jitter factor (0.0-1.0).
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        DEFAULT_RETRY_CONFIG
    }
}

/// Default retry configuration.
pub const DEFAULT_RETRY_CONFIG: RetryConfig = RetryConfig {
    max_attempts: 3,
    initial_delay: Duration::from_millis(100),
    max_delay: Duration::from_secs(10),
    multiplier: 2.0,
    jitter: 0.1,
};

/// Retry executor interface.
#[async_trait]
pub trait RetryExecutor: Send + Sync {
    /// Execute an operation with retry logic.
    async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, IdentityError>
    where
        T: Send,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, IdentityError>> + Send;

    /// Check if an error is retryable.
    fn is_retryable(&self, error: &IdentityError) -> bool;

    /// Get retry statistics.
    fn get_stats(&self) -> RetryStats;
}

/// Retry statistics.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    pub total_attempts: u32,
    pub successful_retries: u32,
    pub failed_operations: u32,
}

/// Identity retry executor implementation.
pub struct IdentityRetryExecutor {
    config: RetryConfig,
    stats: Mutex<RetryStats>,
}

impl IdentityRetryExecutor {
    /// Create new retry executor.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            stats: Mutex::new(RetryStats::default()),
        }
    }

    fn calculate_delay(&self, attempt: u32, error: &IdentityError) -> Duration {
        // Honor a server-provided retry-after when present.
        if let Some(retry_after) = error.retry_after() {
            return retry_after.min(self.config.max_delay);
        }

        let base_delay = self.config.initial_delay.as_millis() as f64
            * self.config.multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.config.max_delay.as_millis() as f64);

        let jitter_range = capped_delay * self.config.jitter;
        let jitter = (rand::random::<f64>() - 0.5) * 2.0 * jitter_range;
        let final_delay = (capped_delay + jitter).max(0.0);

        Duration::from_millis(final_delay as u64)
    }
}

impl Default for IdentityRetryExecutor {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[async_trait]
impl RetryExecutor for IdentityRetryExecutor {
    async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, IdentityError>
    where
        T: Send,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, IdentityError>> + Send,
    {
        let mut last_error = None;

        for attempt in 0..self.config.max_attempts {
            {
                let mut stats = self.stats.lock().unwrap();
                stats.total_attempts += 1;
            }

            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        let mut stats = self.stats.lock().unwrap();
                        stats.successful_retries += 1;
                    }
                    return Ok(result);
                }
                Err(error) => {
                    if !self.is_retryable(&error) || attempt == self.config.max_attempts - 1 {
                        let mut stats = self.stats.lock().unwrap();
                        stats.failed_operations += 1;
                        return Err(error);
                    }

                    let delay = self.calculate_delay(attempt, &error);
                    last_error = Some(error);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            IdentityError::Network(NetworkError::ConnectionFailed {
                message: "retry budget exhausted".to_string(),
            })
        }))
    }

    fn is_retryable(&self, error: &IdentityError) -> bool {
        error.is_retryable()
    }

    fn get_stats(&self) -> RetryStats {
        self.stats.lock().unwrap().clone()
    }
}

/// Mock retry executor for testing.
#[derive(Default)]
pub struct MockRetryExecutor {
    should_retry: Mutex<bool>,
    execution_count: AtomicU32,
    stats: Mutex<RetryStats>,
}

impl MockRetryExecutor {
    /// Create new mock executor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether to retry.
    pub fn set_should_retry(&self, should_retry: bool) -> &Self {
        *self.should_retry.lock().unwrap() = should_retry;
        self
    }

    /// Get execution count.
    pub fn get_execution_count(&self) -> u32 {
        self.execution_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RetryExecutor for MockRetryExecutor {
    async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, IdentityError>
    where
        T: Send,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, IdentityError>> + Send,
    {
        self.execution_count.fetch_add(1, Ordering::SeqCst);
        operation().await
    }

    fn is_retryable(&self, _error: &IdentityError) -> bool {
        *self.should_retry.lock().unwrap()
    }

    fn get_stats(&self) -> RetryStats {
        self.stats.lock().unwrap().clone()
    }
}
