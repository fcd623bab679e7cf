//! 重试机制模块
//!
//! 提供带指数退避的重试逻辑。只用于建立连接，令牌操作本身从不自动重试。

use std::future::Future;

use tessera_errors::{TokenError, TokenResult};
use tracing::{info, warn};

use crate::config::RetryConfig;

/// 带重试的异步操作执行器
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> TokenResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TokenResult<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    info!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "Redis operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if attempt + 1 >= max_attempts || !is_retryable(&e) => {
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = max_attempts,
                    error = %e,
                    "Redis operation failed, no more retries"
                );
                return Err(e);
            }
            Err(e) => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = max_attempts,
                    error = %e,
                    delay_ms = delay.as_millis(),
                    "Redis operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// 只有基础设施错误值得重试
fn is_retryable(error: &TokenError) -> bool {
    matches!(error, TokenError::Store(_) | TokenError::Timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_config() -> RetryConfig {
        RetryConfig::new(3, Duration::from_millis(10), Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_retry_success_first_attempt() {
        let result = with_retry(&fast_config(), "test", || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let counter = AtomicU32::new(0);

        let result = with_retry(&fast_config(), "test", || {
            let count = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err(TokenError::store("connection refused"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_all_failures() {
        let counter = AtomicU32::new(0);

        let result: TokenResult<i32> = with_retry(&fast_config(), "test", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(TokenError::Timeout) }
        })
        .await;

        assert!(matches!(result, Err(TokenError::Timeout)));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_logic_errors_are_not_retried() {
        let counter = AtomicU32::new(0);

        let result: TokenResult<i32> = with_retry(&fast_config(), "test", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(TokenError::config("bad url")) }
        })
        .await;

        assert!(matches!(result, Err(TokenError::Config(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
