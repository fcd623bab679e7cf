//! 基础设施资源管理
//!
//! 把配置映射为 Redis 连接和令牌管理器

use std::sync::Arc;
use std::time::{Duration, Instant};

use secrecy::ExposeSecret;
use tessera_adapter_redis::{RedisConfig, RedisTokenStore, connect_with_retry};
use tessera_config::{ExchangePolicySetting, RedisSettings, TesseraConfig, TokenSettings};
use tessera_core::{ExchangePolicy, ManagerOptions, RefreshLimit, TokenManager};
use tessera_errors::TokenResult;
use tessera_ports::TokenStore;
use tessera_telemetry::HealthStatus;

use crate::error::BootstrapResult;

/// 由配置构建管理器选项
pub fn manager_options(settings: &TokenSettings) -> TokenResult<ManagerOptions> {
    let refresh_token_ttl = settings
        .refresh_tokens_enabled()
        .then(|| Duration::from_secs(settings.refresh_token_ttl));
    let exchange_policy = match settings.exchange_policy {
        ExchangePolicySetting::Reusable => ExchangePolicy::Reusable,
        ExchangePolicySetting::Rotate => ExchangePolicy::Rotate,
    };

    let options = ManagerOptions::new()
        .with_access_token_ttl(Duration::from_secs(settings.access_token_ttl))
        .with_access_token_key_prefix(settings.access_token_key_prefix.as_str())
        .with_refresh_token_ttl(refresh_token_ttl)
        .with_refresh_token_key_prefix(settings.refresh_token_key_prefix.as_str())
        .with_token_key_prefix(settings.token_key_prefix.as_str())
        .with_operation_timeout(Duration::from_secs(settings.operation_timeout))
        .with_refresh_limit(RefreshLimit::try_from(settings.refresh_limit)?)
        .with_exchange_policy(exchange_policy);

    options.validate()?;
    Ok(options)
}

/// 由配置构建 Redis 连接参数
pub fn redis_config(settings: &RedisSettings) -> RedisConfig {
    RedisConfig::new(settings.url.expose_secret().as_str())
        .with_connection_timeout(Duration::from_secs(settings.connection_timeout))
        .with_retry(
            settings.connect_attempts,
            Duration::from_millis(100),
            Duration::from_secs(5),
        )
}

/// 令牌运行时
///
/// 持有配置、存储和已校验的管理器
pub struct TokenRuntime {
    config: TesseraConfig,
    manager: TokenManager,
}

impl TokenRuntime {
    /// 连接 Redis（带重试）并构建管理器
    pub async fn from_config(config: TesseraConfig) -> BootstrapResult<Self> {
        let redis = redis_config(&config.redis);
        let conn = connect_with_retry(&redis).await?;

        Self::with_store(config, Arc::new(RedisTokenStore::new(conn)))
    }

    /// 使用给定存储构建管理器
    pub fn with_store(config: TesseraConfig, store: Arc<dyn TokenStore>) -> BootstrapResult<Self> {
        let options = manager_options(&config.tokens)?;
        let manager = TokenManager::new(store, options)?;
        Ok(Self { config, manager })
    }

    pub fn config(&self) -> &TesseraConfig {
        &self.config
    }

    pub fn manager(&self) -> &TokenManager {
        &self.manager
    }

    /// 检查存储连通性
    pub async fn health(&self) -> HealthStatus {
        let mut status = HealthStatus::new();
        let started = Instant::now();
        let outcome = self.manager.health_check().await;
        status.record("token_store", started.elapsed(), outcome);
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;
    use tessera_adapter_memory::MemoryTokenStore;
    use tessera_config::{RedisSettings, TelemetryConfig};
    use tessera_core::Payload;
    use tessera_errors::TokenError;

    fn config(tokens: TokenSettings) -> TesseraConfig {
        TesseraConfig {
            app_name: "tessera-test".to_string(),
            app_env: "test".to_string(),
            redis: RedisSettings {
                url: Secret::new("redis://:pw@127.0.0.1:6379".to_string()),
                connect_attempts: 1,
                connection_timeout: 1,
            },
            telemetry: TelemetryConfig::default(),
            tokens,
        }
    }

    #[test]
    fn test_manager_options_mapping() {
        let settings = TokenSettings {
            refresh_token_ttl: 0,
            refresh_limit: 3,
            exchange_policy: ExchangePolicySetting::Rotate,
            ..TokenSettings::default()
        };
        let options = manager_options(&settings).unwrap();
        assert_eq!(options.refresh_token_ttl, None);
        assert_eq!(options.refresh_limit, RefreshLimit::Capped(3));
        assert_eq!(options.exchange_policy, ExchangePolicy::Rotate);
        assert_eq!(options.operation_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_manager_options_rejects_bad_limit() {
        let settings = TokenSettings {
            refresh_limit: -5,
            ..TokenSettings::default()
        };
        assert!(matches!(
            manager_options(&settings),
            Err(TokenError::Config(_))
        ));
    }

    #[test]
    fn test_redis_config_mapping() {
        let redis = redis_config(&config(TokenSettings::default()).redis);
        assert_eq!(redis.retry_max_attempts, 1);
        assert_eq!(redis.connection_timeout, Duration::from_secs(1));
        assert!(!redis.redacted_url().contains("pw"));
    }

    #[tokio::test]
    async fn test_runtime_with_memory_store() {
        let runtime = TokenRuntime::with_store(
            config(TokenSettings::default()),
            Arc::new(MemoryTokenStore::new()),
        )
        .unwrap();

        let (access, _) = runtime
            .manager()
            .issue_token_pair(Payload::new())
            .await
            .unwrap();
        assert!(runtime.manager().parse_access_token(access.value()).await.is_ok());

        let health = runtime.health().await;
        assert!(health.healthy);
        assert_eq!(health.checks[0].name, "token_store");
        assert_eq!(runtime.config().app_name, "tessera-test");
    }
}
