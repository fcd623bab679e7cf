//! 持久化记录模型
//!
//! 每个令牌对应存储中的一个哈希表，键为 `<前缀><令牌值>`。
//! 以 `_` 开头的字段由引擎保留，其余字段是调用方的荷载。

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use tessera_errors::{TokenError, TokenResult};

use crate::limit::RefreshLimit;

/// 调用方荷载
pub type Payload = BTreeMap<String, String>;

/// 保留字段前缀
pub const RESERVED_PREFIX: &str = "_";

/// 保留字段名
pub mod fields {
    pub const CREATED_AT: &str = "_created_at";
    pub const TTL: &str = "_ttl";
    pub const EXPIRES_AT: &str = "_expires_at";
    pub const REFRESHED_AT: &str = "_refreshed_at";
    pub const REFRESH_COUNT: &str = "_refresh_count";
    pub const REFRESH_LIMIT: &str = "_refresh_limit";
    pub const IP: &str = "_ip";
    pub const FINGERPRINT: &str = "_fingerprint";
    pub const CHILD_TOKEN: &str = "_child_token";
    pub const ACCESS_TOKEN: &str = "_access_token";
    pub const USE_COUNT: &str = "_use_count";
    pub const USED_AT: &str = "_used_at";
}

/// 字段名是否属于引擎保留
pub fn is_reserved(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
}

/// 拒绝包含保留字段名的荷载
pub fn validate_payload(payload: &Payload) -> TokenResult<()> {
    match payload.keys().find(|name| is_reserved(name)) {
        Some(name) => Err(TokenError::reserved_field(name.as_str())),
        None => Ok(()),
    }
}

pub(crate) fn now() -> i64 {
    Utc::now().timestamp()
}

/// 从存储读出的记录
///
/// 必需的保留字段缺失或格式错误时统一视为无效令牌
pub(crate) struct RecordReader {
    fields: HashMap<String, String>,
}

impl RecordReader {
    /// 空记录（键不存在或已过期）返回 InvalidToken
    pub fn new(fields: HashMap<String, String>) -> TokenResult<Self> {
        if fields.is_empty() {
            return Err(TokenError::InvalidToken);
        }
        Ok(Self { fields })
    }

    pub fn text(&self, name: &str) -> TokenResult<String> {
        self.fields.get(name).cloned().ok_or(TokenError::InvalidToken)
    }

    pub fn number<T: FromStr>(&self, name: &str) -> TokenResult<T> {
        self.fields
            .get(name)
            .and_then(|raw| raw.parse().ok())
            .ok_or(TokenError::InvalidToken)
    }

    pub fn refresh_limit(&self) -> TokenResult<RefreshLimit> {
        RefreshLimit::try_from(self.number::<i64>(fields::REFRESH_LIMIT)?)
            .map_err(|_| TokenError::InvalidToken)
    }

    pub fn into_payload(self) -> Payload {
        self.fields
            .into_iter()
            .filter(|(name, _)| !is_reserved(name))
            .collect()
    }
}

/// 待写入的记录字段
#[derive(Debug, Default)]
pub(crate) struct RecordWriter {
    fields: Vec<(String, String)>,
}

impl RecordWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: &str, value: impl Into<String>) -> Self {
        self.fields.push((name.to_string(), value.into()));
        self
    }

    pub fn number(self, name: &str, value: impl ToString) -> Self {
        let value = value.to_string();
        self.text(name, value)
    }

    pub fn payload(mut self, payload: &Payload) -> Self {
        self.fields
            .extend(payload.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn into_fields(self) -> Vec<(String, String)> {
        self.fields
    }
}

/// 按需剥离保留字段
pub(crate) fn project(fields: HashMap<String, String>, include_metadata: bool) -> Payload {
    fields
        .into_iter()
        .filter(|(name, _)| include_metadata || !is_reserved(name))
        .collect()
}
