//! TokenStore trait 定义

use async_trait::async_trait;
use std::collections::HashMap;
use tessera_errors::TokenResult;

use crate::{CommitOutcome, Transaction};

/// 键的剩余存活时间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// 键不存在（包括已过期）
    Missing,
    /// 键存在但没有过期时间
    Persistent,
    /// 剩余秒数
    Expires(u64),
}

impl KeyTtl {
    /// 将 Redis TTL 命令的返回值转换为 KeyTtl
    ///
    /// -2 表示键不存在，-1 表示没有过期时间
    pub fn from_redis(ttl: i64) -> Self {
        match ttl {
            -1 => Self::Persistent,
            t if t < 0 => Self::Missing,
            t => Self::Expires(t as u64),
        }
    }
}

/// 令牌存储 trait
///
/// 记录是以字符串为键的哈希表，支持整键过期。
/// 键不存在必须与传输失败区分开：前者返回空值，后者返回错误。
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// 检查键是否存在
    async fn exists(&self, key: &str) -> TokenResult<bool>;

    /// 读取单个字段，键或字段不存在时返回 None
    async fn get_field(&self, key: &str, field: &str) -> TokenResult<Option<String>>;

    /// 读取全部字段，键不存在时返回空表
    async fn get_all(&self, key: &str) -> TokenResult<HashMap<String, String>>;

    /// 写入一个或多个字段（不修改过期时间）
    async fn set_fields(&self, key: &str, fields: &[(String, String)]) -> TokenResult<()>;

    /// 查询剩余存活时间
    async fn ttl(&self, key: &str) -> TokenResult<KeyTtl>;

    /// 删除键，返回实际删除的数量；删除不存在的键不是错误
    async fn delete(&self, keys: &[String]) -> TokenResult<u64>;

    /// 原子地执行事务：先检查全部守卫，全部通过才执行全部写操作
    async fn commit(&self, tx: &Transaction) -> TokenResult<CommitOutcome>;

    /// 健康检查
    async fn ping(&self) -> TokenResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ttl_from_redis() {
        assert_eq!(KeyTtl::from_redis(-2), KeyTtl::Missing);
        assert_eq!(KeyTtl::from_redis(-1), KeyTtl::Persistent);
        assert_eq!(KeyTtl::from_redis(0), KeyTtl::Expires(0));
        assert_eq!(KeyTtl::from_redis(42), KeyTtl::Expires(42));
    }
}
