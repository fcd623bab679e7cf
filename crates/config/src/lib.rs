//! tessera-config - 配置加载库

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use thiserror::Error;

use secrecy::Secret;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] figment::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Redis 配置
#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    pub url: Secret<String>,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
}

fn default_connect_attempts() -> u32 {
    5
}

fn default_connection_timeout() -> u64 {
    5
}

/// 遥测配置
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 以 JSON 格式输出日志
    #[serde(default)]
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// 刷新令牌兑换策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangePolicySetting {
    #[default]
    Reusable,
    Rotate,
}

/// 令牌配置，时间单位均为秒
#[derive(Debug, Clone, Deserialize)]
pub struct TokenSettings {
    #[serde(default = "default_access_token_ttl")]
    pub access_token_ttl: u64,
    #[serde(default = "default_access_token_key_prefix")]
    pub access_token_key_prefix: String,
    /// 0 表示不使用刷新令牌
    #[serde(default = "default_refresh_token_ttl")]
    pub refresh_token_ttl: u64,
    #[serde(default = "default_refresh_token_key_prefix")]
    pub refresh_token_key_prefix: String,
    #[serde(default = "default_token_key_prefix")]
    pub token_key_prefix: String,
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout: u64,
    /// 0 不限，-1 禁止刷新，n > 0 最多刷新 n 次
    #[serde(default)]
    pub refresh_limit: i64,
    #[serde(default)]
    pub exchange_policy: ExchangePolicySetting,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            access_token_ttl: default_access_token_ttl(),
            access_token_key_prefix: default_access_token_key_prefix(),
            refresh_token_ttl: default_refresh_token_ttl(),
            refresh_token_key_prefix: default_refresh_token_key_prefix(),
            token_key_prefix: default_token_key_prefix(),
            operation_timeout: default_operation_timeout(),
            refresh_limit: 0,
            exchange_policy: ExchangePolicySetting::Reusable,
        }
    }
}

fn default_access_token_ttl() -> u64 {
    3600
}

fn default_refresh_token_ttl() -> u64 {
    604800
}

fn default_access_token_key_prefix() -> String {
    "access:".to_string()
}

fn default_refresh_token_key_prefix() -> String {
    "refresh:".to_string()
}

fn default_token_key_prefix() -> String {
    "token:".to_string()
}

fn default_operation_timeout() -> u64 {
    10
}

impl TokenSettings {
    pub fn refresh_tokens_enabled(&self) -> bool {
        self.refresh_token_ttl > 0
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.operation_timeout < 1 {
            return Err(invalid("tokens.operation_timeout must be at least 1"));
        }
        if self.access_token_ttl < 1 {
            return Err(invalid("tokens.access_token_ttl must be at least 1"));
        }
        if self.refresh_limit < -1 {
            return Err(invalid("tokens.refresh_limit must be -1, 0 or positive"));
        }

        let mut prefixes = vec![&self.access_token_key_prefix, &self.token_key_prefix];
        if self.refresh_tokens_enabled() {
            if self.refresh_token_ttl <= self.access_token_ttl {
                return Err(invalid(
                    "tokens.refresh_token_ttl must exceed tokens.access_token_ttl",
                ));
            }
            prefixes.push(&self.refresh_token_key_prefix);
        }

        if prefixes.iter().any(|prefix| prefix.is_empty()) {
            return Err(invalid("token key prefixes must not be empty"));
        }
        for (i, prefix) in prefixes.iter().enumerate() {
            if prefixes[i + 1..].contains(prefix) {
                return Err(invalid(format!("duplicate token key prefix: {}", prefix)));
            }
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

fn default_app_name() -> String {
    "tessera".to_string()
}

fn default_app_env() -> String {
    "development".to_string()
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
pub struct TesseraConfig {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_app_env")]
    pub app_env: String,
    pub redis: RedisSettings,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub tokens: TokenSettings,
}

impl TesseraConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 优先级：`<dir>/default.toml` < `<dir>/<APP_ENV>.toml` < `TESSERA_` 环境变量，
    /// 嵌套字段用 `__` 分隔，例如 `TESSERA_TOKENS__ACCESS_TOKEN_TTL`
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| default_app_env());

        let config: Self = Figment::new()
            .merge(Toml::file(format!("{}/default.toml", config_dir)))
            .merge(Toml::file(format!("{}/{}.toml", config_dir, env)))
            .merge(Env::prefixed("TESSERA_").split("__"))
            .extract()?;

        config.tokens.validate()?;
        Ok(config)
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }

    /// 是否为开发环境
    pub fn is_development(&self) -> bool {
        self.app_env == "development"
    }
}
