//! Resilience
//!
//! Caller-side retry for transient identity failures.

pub mod retry;

pub use retry::{
    IdentityRetryExecutor, MockRetryExecutor, RetryConfig, RetryExecutor, RetryStats,
    DEFAULT_RETRY_CONFIG,
};
