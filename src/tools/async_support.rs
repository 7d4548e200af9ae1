// src/tools/async_support.rs
//! 提供异步工具: 超时与有界重试

use crate::core::errors::WalletError;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::info;

/// 异步操作结果类型
pub type AsyncResult<T> = Result<T, WalletError>;

/// 超时配置
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub duration: Duration,
    pub operation_name: String,
}

impl TimeoutConfig {
    /// 创建超时配置
    pub fn new(duration: Duration, operation_name: impl Into<String>) -> Self {
        Self { duration, operation_name: operation_name.into() }
    }
}

/// Per-attempt timeout plus capped exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// A single attempt bounded by `timeout`.
    pub fn once(timeout: Duration) -> Self {
        Self { timeout, max_attempts: 1, initial_backoff: Duration::ZERO, max_backoff: Duration::ZERO }
    }
}

/// 执行带超时/重试等工具方法的执行器
pub struct AsyncExecutor;

impl AsyncExecutor {
    /// 带超时执行异步操作
    pub async fn execute_with_timeout<F, T>(future: F, config: TimeoutConfig) -> AsyncResult<T>
    where
        F: Future<Output = AsyncResult<T>>,
    {
        match timeout(config.duration, future).await {
            Ok(result) => result,
            Err(_) => Err(WalletError::TimeoutError(format!(
                "Operation '{}' timed out after {:?}",
                config.operation_name, config.duration
            ))),
        }
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error, or the
    /// policy's attempts are spent. Each attempt is bounded by the policy timeout.
    pub async fn retry<F, Fut, T>(
        operation_name: &str,
        policy: &RetryPolicy,
        mut operation: F,
    ) -> AsyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AsyncResult<T>>,
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut current_delay = policy.initial_backoff;
        let mut last_error: Option<WalletError> = None;

        for attempt in 1..=max_attempts {
            let config = TimeoutConfig::new(policy.timeout, operation_name);
            match Self::execute_with_timeout(operation(), config).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    // Only retry on retryable errors
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    last_error = Some(e);
                    if attempt < max_attempts {
                        info!(
                            operation = operation_name,
                            "Operation failed (attempt {}/{}). Retrying in {:?}...",
                            attempt, max_attempts, current_delay
                        );
                        tokio::time::sleep(current_delay).await;
                        current_delay = (current_delay * 2).min(policy.max_backoff);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            WalletError::InternalError(format!("{}: retry loop made no attempt", operation_name))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_policy(attempts: usize) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(50),
            max_attempts: attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn test_timeout_maps_to_timeout_error() {
        let result: AsyncResult<()> = AsyncExecutor::execute_with_timeout(
            async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            },
            TimeoutConfig::new(Duration::from_millis(10), "slow"),
        )
        .await;
        assert!(matches!(result, Err(WalletError::TimeoutError(_))));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let result = AsyncExecutor::retry("flaky", &fast_policy(3), || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(WalletError::NetworkError("reset".into()))
                } else {
                    Ok(7u32)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_is_bounded() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let result: AsyncResult<()> = AsyncExecutor::retry("down", &fast_policy(3), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(WalletError::NetworkError("refused".into()))
            }
        })
        .await;
        assert!(matches!(result, Err(WalletError::NetworkError(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let result: AsyncResult<()> = AsyncExecutor::retry("denied", &fast_policy(5), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(WalletError::SigningDenied("user".into()))
            }
        })
        .await;
        assert!(matches!(result, Err(WalletError::SigningDenied(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
