//! Redis 连接管理

use redis::Client;
use redis::aio::ConnectionManager;
use tessera_errors::{TokenError, TokenResult};
use tracing::info;

use crate::config::{RedisConfig, RetryConfig};
use crate::retry::with_retry;

/// 创建 Redis 连接管理器
pub async fn create_connection_manager(config: &RedisConfig) -> TokenResult<ConnectionManager> {
    // URL 格式错误重试也没有用
    let client = Client::open(config.url.as_str())
        .map_err(|e| TokenError::config(format!("Invalid Redis URL: {}", e)))?;

    tokio::time::timeout(config.connection_timeout, ConnectionManager::new(client))
        .await
        .map_err(|_| TokenError::Timeout)?
        .map_err(|e| {
            TokenError::store(format!("Failed to create Redis connection manager: {}", e))
        })
}

/// 创建 Redis 连接管理器（带重试）
pub async fn connect_with_retry(config: &RedisConfig) -> TokenResult<ConnectionManager> {
    let retry_config = RetryConfig::from_redis_config(config);
    let conn = with_retry(&retry_config, "Redis connection", || {
        create_connection_manager(config)
    })
    .await?;

    info!(url = %config.redacted_url(), "Redis connection created");
    Ok(conn)
}

/// 检查 Redis 连接
pub async fn check_connection(conn: &mut ConnectionManager) -> TokenResult<()> {
    redis::cmd("PING")
        .query_async::<String>(conn)
        .await
        .map_err(|e| TokenError::store(format!("Redis health check failed: {}", e)))?;
    Ok(())
}
