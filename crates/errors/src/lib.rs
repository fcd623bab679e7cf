//! tessera-errors - 令牌引擎统一错误处理
//!
//! 错误分为两层：
//! - 逻辑错误：调用方造成（令牌无效、已过期、刷新次数用尽……），可以泛化后展示给终端用户
//! - 基础设施错误：与调用方无关（存储不可达、超时、事务中止……），应当重试或告警
//!
//! Problem Details 输出基于 RFC 7807 规范

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 错误层级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorTier {
    /// 调用方错误
    Logic,
    /// 基础设施错误
    Infrastructure,
}

/// 令牌引擎错误类型
#[derive(Debug, Error)]
pub enum TokenError {
    // ---------------------------------------------------------------- logic
    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    Expired,

    #[error("Signature mismatch")]
    SignatureMismatch,

    #[error("Refresh limit reached")]
    RefreshLimitReached,

    #[error("Refresh is disabled for this token")]
    RefreshDisabled,

    #[error("Refresh token is not bound to the presented access token")]
    TokenMismatch,

    #[error("Token already has a child token")]
    AlreadyHasChild,

    #[error("Reserved field name: {0}")]
    ReservedField(String),

    #[error("TTL must be at least one second")]
    InvalidTtl,

    #[error("Configuration error: {0}")]
    Config(String),

    // ------------------------------------------------------- infrastructure
    #[error("Store error: {0}")]
    Store(String),

    #[error("Store operation timed out")]
    Timeout,

    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("Token was modified concurrently")]
    ConcurrentUpdate,

    #[error("Generated token value already exists")]
    Collision,

    #[error("Identifier generator returned an empty value")]
    EmptyIdentifier,

    #[error("Encoding error: {0}")]
    Encoding(String),
}

impl TokenError {
    pub fn reserved_field(name: impl Into<String>) -> Self {
        Self::ReservedField(name.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn transaction_aborted(msg: impl Into<String>) -> Self {
        Self::TransactionAborted(msg.into())
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }

    /// 错误所属层级
    pub fn tier(&self) -> ErrorTier {
        match self {
            Self::InvalidToken
            | Self::Expired
            | Self::SignatureMismatch
            | Self::RefreshLimitReached
            | Self::RefreshDisabled
            | Self::TokenMismatch
            | Self::AlreadyHasChild
            | Self::ReservedField(_)
            | Self::InvalidTtl
            | Self::Config(_) => ErrorTier::Logic,
            Self::Store(_)
            | Self::Timeout
            | Self::TransactionAborted(_)
            | Self::ConcurrentUpdate
            | Self::Collision
            | Self::EmptyIdentifier
            | Self::Encoding(_) => ErrorTier::Infrastructure,
        }
    }

    pub fn is_logic(&self) -> bool {
        self.tier() == ErrorTier::Logic
    }

    pub fn is_infrastructure(&self) -> bool {
        self.tier() == ErrorTier::Infrastructure
    }

    /// 转换为 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidToken | Self::Expired | Self::SignatureMismatch => 401,
            Self::RefreshLimitReached | Self::RefreshDisabled | Self::TokenMismatch => 403,
            Self::AlreadyHasChild => 409,
            Self::ReservedField(_) | Self::InvalidTtl => 400,
            Self::Config(_) => 500,
            Self::Store(_) | Self::TransactionAborted(_) => 503,
            Self::Timeout => 504,
            Self::ConcurrentUpdate => 409,
            Self::Collision | Self::EmptyIdentifier | Self::Encoding(_) => 500,
        }
    }

    /// 转换为 Problem Details
    ///
    /// 基础设施错误的细节不会透出给调用方
    pub fn to_problem_details(&self) -> ProblemDetails {
        let detail = match self.tier() {
            ErrorTier::Logic => self.to_string(),
            ErrorTier::Infrastructure => "The operation could not be completed".to_string(),
        };
        ProblemDetails {
            r#type: format!("https://tessera.dev/problems/{}", self.problem_slug()),
            title: self.problem_title().to_string(),
            status: self.status_code(),
            detail,
            instance: None,
        }
    }

    fn problem_slug(&self) -> &'static str {
        match self {
            Self::InvalidToken => "invalid-token",
            Self::Expired => "expired",
            Self::SignatureMismatch => "signature-mismatch",
            Self::RefreshLimitReached => "refresh-limit-reached",
            Self::RefreshDisabled => "refresh-disabled",
            Self::TokenMismatch => "token-mismatch",
            Self::AlreadyHasChild => "already-has-child",
            Self::ReservedField(_) => "reserved-field",
            Self::InvalidTtl => "invalid-ttl",
            Self::Config(_) => "config",
            Self::Store(_) => "store",
            Self::Timeout => "timeout",
            Self::TransactionAborted(_) => "transaction-aborted",
            Self::ConcurrentUpdate => "concurrent-update",
            Self::Collision => "collision",
            Self::EmptyIdentifier => "empty-identifier",
            Self::Encoding(_) => "encoding",
        }
    }

    fn problem_title(&self) -> &'static str {
        match self {
            Self::InvalidToken => "Invalid Token",
            Self::Expired => "Token Expired",
            Self::SignatureMismatch => "Signature Mismatch",
            Self::RefreshLimitReached => "Refresh Limit Reached",
            Self::RefreshDisabled => "Refresh Disabled",
            Self::TokenMismatch => "Token Mismatch",
            Self::AlreadyHasChild => "Child Token Exists",
            Self::ReservedField(_) => "Reserved Field",
            Self::InvalidTtl => "Invalid TTL",
            Self::Config(_) => "Configuration Error",
            Self::Store(_) => "Store Unavailable",
            Self::Timeout => "Store Timeout",
            Self::TransactionAborted(_) => "Transaction Aborted",
            Self::ConcurrentUpdate => "Concurrent Update",
            Self::Collision => "Token Collision",
            Self::EmptyIdentifier => "Identifier Generation Failed",
            Self::Encoding(_) => "Encoding Error",
        }
    }
}

/// RFC 7807 Problem Details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemDetails {
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

/// Result 类型别名
pub type TokenResult<T> = Result<T, TokenError>;
