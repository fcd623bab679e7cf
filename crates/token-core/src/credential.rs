//! 可撤销凭证的公共能力

use async_trait::async_trait;
use std::fmt;
use tessera_errors::TokenResult;

use crate::record::Payload;

/// 凭证种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    Access,
    Refresh,
    Chained,
}

impl CredentialKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
            Self::Chained => "chained",
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 可撤销凭证
///
/// 访问令牌、刷新令牌和链式令牌都以带过期时间的存储记录为准，
/// 调用方可以不关心具体形态，统一读取元数据并撤销。
#[async_trait]
pub trait Credential: Send + Sync {
    fn kind(&self) -> CredentialKind;

    fn value(&self) -> &str;

    fn created_at(&self) -> i64;

    fn expires_at(&self) -> i64;

    fn payload(&self) -> &Payload;

    /// 删除存储记录；记录已不存在时同样成功
    async fn revoke(&self) -> TokenResult<()>;
}
