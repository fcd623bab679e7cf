//! 令牌管理器
//!
//! 持有一个命名空间的配置（键前缀、TTL 策略、值生成器、操作超时），
//! 对外提供访问令牌、刷新令牌和链式令牌的统一入口。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tessera_errors::{TokenError, TokenResult};
use tessera_ports::TokenStore;
use tracing::{info, instrument, warn};

use crate::access_token::AccessToken;
use crate::credential::CredentialKind;
use crate::gateway::StoreGateway;
use crate::id::{IdGenerator, UuidV7Generator};
use crate::limit::RefreshLimit;
use crate::metrics;
use crate::record::Payload;
use crate::refresh_token::RefreshToken;
use crate::token::{Token, TokenMeta};

/// 刷新令牌兑换策略，必须在签发前确定
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExchangePolicy {
    /// 刷新令牌值不变，只替换绑定的访问令牌，不延长过期时间
    #[default]
    Reusable,
    /// 一次性：每次兑换删除旧刷新令牌并签发新值
    Rotate,
}

impl ExchangePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reusable => "reusable",
            Self::Rotate => "rotate",
        }
    }
}

impl std::str::FromStr for ExchangePolicy {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reusable" => Ok(Self::Reusable),
            "rotate" => Ok(Self::Rotate),
            other => Err(TokenError::config(format!(
                "unknown exchange policy: {}",
                other
            ))),
        }
    }
}

/// 管理器配置
#[derive(Clone)]
pub struct ManagerOptions {
    pub access_token_ttl: Duration,
    pub access_token_key_prefix: String,
    /// `None` 表示不使用刷新令牌
    pub refresh_token_ttl: Option<Duration>,
    pub refresh_token_key_prefix: String,
    pub token_key_prefix: String,
    pub operation_timeout: Duration,
    /// 新签发令牌的默认刷新次数上限
    pub refresh_limit: RefreshLimit,
    pub exchange_policy: ExchangePolicy,
    pub generator: Arc<dyn IdGenerator>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            access_token_ttl: Duration::from_secs(3600),
            access_token_key_prefix: "access:".to_string(),
            refresh_token_ttl: Some(Duration::from_secs(7 * 24 * 3600)),
            refresh_token_key_prefix: "refresh:".to_string(),
            token_key_prefix: "token:".to_string(),
            operation_timeout: Duration::from_secs(10),
            refresh_limit: RefreshLimit::Unlimited,
            exchange_policy: ExchangePolicy::Reusable,
            generator: Arc::new(UuidV7Generator),
        }
    }
}

impl fmt::Debug for ManagerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerOptions")
            .field("access_token_ttl", &self.access_token_ttl)
            .field("access_token_key_prefix", &self.access_token_key_prefix)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("refresh_token_key_prefix", &self.refresh_token_key_prefix)
            .field("token_key_prefix", &self.token_key_prefix)
            .field("operation_timeout", &self.operation_timeout)
            .field("refresh_limit", &self.refresh_limit)
            .field("exchange_policy", &self.exchange_policy)
            .finish_non_exhaustive()
    }
}

impl ManagerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_access_token_ttl(mut self, ttl: Duration) -> Self {
        self.access_token_ttl = ttl;
        self
    }

    pub fn with_access_token_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.access_token_key_prefix = prefix.into();
        self
    }

    pub fn with_refresh_token_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.refresh_token_ttl = ttl;
        self
    }

    pub fn with_refresh_token_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.refresh_token_key_prefix = prefix.into();
        self
    }

    pub fn with_token_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.token_key_prefix = prefix.into();
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_refresh_limit(mut self, limit: RefreshLimit) -> Self {
        self.refresh_limit = limit;
        self
    }

    pub fn with_exchange_policy(mut self, policy: ExchangePolicy) -> Self {
        self.exchange_policy = policy;
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn IdGenerator>) -> Self {
        self.generator = generator;
        self
    }

    /// 校验配置，失败返回 `TokenError::Config`
    pub fn validate(&self) -> TokenResult<()> {
        if self.operation_timeout < Duration::from_secs(1) {
            return Err(TokenError::config("operation timeout must be at least 1s"));
        }
        if self.access_token_ttl.as_secs() < 1 {
            return Err(TokenError::config("access token ttl must be at least 1s"));
        }
        if self.access_token_key_prefix.is_empty() {
            return Err(TokenError::config("access token key prefix must not be empty"));
        }
        if self.token_key_prefix.is_empty() {
            return Err(TokenError::config("token key prefix must not be empty"));
        }
        if self.token_key_prefix == self.access_token_key_prefix {
            return Err(TokenError::config(
                "token and access token key prefixes must differ",
            ));
        }

        if let Some(refresh_ttl) = self.refresh_token_ttl {
            if refresh_ttl.as_secs() <= self.access_token_ttl.as_secs() {
                return Err(TokenError::config(
                    "refresh token ttl must exceed access token ttl",
                ));
            }
            if self.refresh_token_key_prefix.is_empty() {
                return Err(TokenError::config(
                    "refresh token key prefix must not be empty",
                ));
            }
            if self.refresh_token_key_prefix == self.access_token_key_prefix
                || self.refresh_token_key_prefix == self.token_key_prefix
            {
                return Err(TokenError::config(
                    "refresh token key prefix must differ from other prefixes",
                ));
            }
        }

        Ok(())
    }
}

/// 引擎之间共享的上下文
pub(crate) struct Shared {
    pub gateway: StoreGateway,
    pub options: ManagerOptions,
}

impl Shared {
    pub fn access_key(&self, value: &str) -> String {
        format!("{}{}", self.options.access_token_key_prefix, value)
    }

    pub fn refresh_key(&self, value: &str) -> String {
        format!("{}{}", self.options.refresh_token_key_prefix, value)
    }

    pub fn token_key(&self, value: &str) -> String {
        format!("{}{}", self.options.token_key_prefix, value)
    }

    pub fn refresh_token_ttl(&self) -> TokenResult<Duration> {
        self.options
            .refresh_token_ttl
            .ok_or_else(|| TokenError::config("refresh tokens are not enabled"))
    }

    /// 生成新的令牌值
    pub fn generate(&self) -> TokenResult<String> {
        let value = self.options.generator.generate();
        if value.is_empty() {
            return Err(TokenError::EmptyIdentifier);
        }
        Ok(value)
    }

    /// 格式校验，不合格的值不会触达存储
    pub fn check_value(&self, value: &str) -> TokenResult<()> {
        if self.options.generator.is_well_formed(value) {
            Ok(())
        } else {
            Err(TokenError::InvalidToken)
        }
    }
}

/// TTL 必须是至少一秒的整秒数
pub(crate) fn ttl_secs(ttl: Duration) -> TokenResult<u64> {
    match ttl.as_secs() {
        0 => Err(TokenError::InvalidTtl),
        secs => Ok(secs),
    }
}

/// 令牌管理器
#[derive(Clone)]
pub struct TokenManager {
    shared: Arc<Shared>,
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("options", &self.shared.options)
            .finish()
    }
}

impl TokenManager {
    /// 创建管理器，配置不合法时立即失败
    pub fn new(store: Arc<dyn TokenStore>, options: ManagerOptions) -> TokenResult<Self> {
        options.validate()?;

        info!(
            access_token_key_prefix = %options.access_token_key_prefix,
            refresh_tokens = options.refresh_token_ttl.is_some(),
            exchange_policy = options.exchange_policy.as_str(),
            "Token manager initialized"
        );

        let gateway = StoreGateway::new(store, options.operation_timeout);
        Ok(Self {
            shared: Arc::new(Shared { gateway, options }),
        })
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.shared.options
    }

    // ------------------------------------------------------------------------
    // 访问令牌
    // ------------------------------------------------------------------------

    /// 以配置的 TTL 签发访问令牌
    pub async fn issue_access_token(&self, payload: Payload) -> TokenResult<AccessToken> {
        self.issue_access_token_with_ttl(payload, self.shared.options.access_token_ttl)
            .await
    }

    #[instrument(skip_all, fields(ttl_secs = ttl.as_secs()))]
    pub async fn issue_access_token_with_ttl(
        &self,
        payload: Payload,
        ttl: Duration,
    ) -> TokenResult<AccessToken> {
        AccessToken::issue(self.shared.clone(), payload, ttl).await
    }

    pub async fn parse_access_token(&self, value: &str) -> TokenResult<AccessToken> {
        AccessToken::parse(self.shared.clone(), value).await
    }

    /// 销毁访问令牌，不存在时同样成功
    pub async fn destroy_access_token(&self, value: &str) -> TokenResult<()> {
        self.shared.check_value(value)?;
        let key = self.shared.access_key(value);
        self.shared
            .gateway
            .within("destroy_access_token", self.shared.gateway.delete(&[key]))
            .await?;
        metrics::record_revoked(CredentialKind::Access);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // 刷新令牌
    // ------------------------------------------------------------------------

    /// 为已存在的访问令牌签发刷新令牌
    pub async fn issue_refresh_token(
        &self,
        access_token: &str,
        payload: Payload,
    ) -> TokenResult<RefreshToken> {
        let ttl = self.shared.refresh_token_ttl()?;
        RefreshToken::issue(self.shared.clone(), access_token, payload, ttl).await
    }

    /// 同时签发访问令牌和绑定的刷新令牌
    ///
    /// 刷新令牌签发失败时删除已签发的访问令牌
    #[instrument(skip_all)]
    pub async fn issue_token_pair(
        &self,
        payload: Payload,
    ) -> TokenResult<(AccessToken, RefreshToken)> {
        self.shared.refresh_token_ttl()?;
        let access_token = self.issue_access_token(payload.clone()).await?;

        match self
            .issue_refresh_token(access_token.value(), payload)
            .await
        {
            Ok(refresh_token) => Ok((access_token, refresh_token)),
            Err(e) => {
                if let Err(cleanup) = access_token.destroy().await {
                    warn!(error = %cleanup, "Failed to clean up access token after pair issue failure");
                }
                Err(e)
            }
        }
    }

    pub async fn parse_refresh_token(&self, value: &str) -> TokenResult<RefreshToken> {
        self.shared.refresh_token_ttl()?;
        RefreshToken::parse(self.shared.clone(), value).await
    }

    /// 用刷新令牌兑换新的访问令牌
    ///
    /// 返回兑换后的刷新令牌（轮换策略下为新值）和新的访问令牌
    pub async fn exchange_refresh_token(
        &self,
        value: &str,
        payload: Payload,
    ) -> TokenResult<(RefreshToken, AccessToken)> {
        let mut refresh_token = self.parse_refresh_token(value).await?;
        let access_token = refresh_token.exchange(payload).await?;
        Ok((refresh_token, access_token))
    }

    /// 销毁刷新令牌；`cascade` 为 true 时一并删除当前绑定的访问令牌
    pub async fn destroy_refresh_token(&self, value: &str, cascade: bool) -> TokenResult<()> {
        self.shared.refresh_token_ttl()?;
        self.shared.check_value(value)?;
        RefreshToken::destroy_by_value(&self.shared, value, cascade).await
    }

    // ------------------------------------------------------------------------
    // 链式令牌
    // ------------------------------------------------------------------------

    pub async fn make_token(&self, meta: TokenMeta, payload: Payload) -> TokenResult<Token> {
        Token::make(self.shared.clone(), meta, payload).await
    }

    pub async fn parse_token(&self, value: &str) -> TokenResult<Token> {
        Token::parse(self.shared.clone(), value).await
    }

    /// 销毁链式令牌；`cascade` 为 true 时一并删除子令牌
    pub async fn destroy_token(&self, value: &str, cascade: bool) -> TokenResult<()> {
        self.shared.check_value(value)?;
        Token::destroy_by_value(&self.shared, value, cascade).await
    }

    /// 检查存储是否可用
    pub async fn health_check(&self) -> TokenResult<()> {
        self.shared
            .gateway
            .within("health_check", self.shared.gateway.ping())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_valid() {
        assert!(ManagerOptions::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_short_timeout() {
        let options = ManagerOptions::new().with_operation_timeout(Duration::from_millis(500));
        assert!(matches!(options.validate(), Err(TokenError::Config(_))));
    }

    #[test]
    fn test_rejects_refresh_ttl_not_exceeding_access_ttl() {
        let options = ManagerOptions::new()
            .with_access_token_ttl(Duration::from_secs(600))
            .with_refresh_token_ttl(Some(Duration::from_secs(600)));
        assert!(matches!(options.validate(), Err(TokenError::Config(_))));

        let options = options.with_refresh_token_ttl(None);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_prefixes() {
        let options = ManagerOptions::new().with_access_token_key_prefix("");
        assert!(options.validate().is_err());

        let options = ManagerOptions::new().with_refresh_token_key_prefix("access:");
        assert!(options.validate().is_err());

        let options = ManagerOptions::new().with_token_key_prefix("access:");
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_exchange_policy_parse() {
        assert_eq!(
            "rotate".parse::<ExchangePolicy>().unwrap(),
            ExchangePolicy::Rotate
        );
        assert!("sometimes".parse::<ExchangePolicy>().is_err());
    }

    #[test]
    fn test_ttl_secs() {
        assert!(matches!(ttl_secs(Duration::ZERO), Err(TokenError::InvalidTtl)));
        assert!(matches!(
            ttl_secs(Duration::from_millis(999)),
            Err(TokenError::InvalidTtl)
        ));
        assert_eq!(ttl_secs(Duration::from_secs(60)).unwrap(), 60);
    }
}
