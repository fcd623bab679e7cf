//! 单令牌模型：可绑定 IP / 指纹，最多挂载一个子令牌

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tessera_errors::{TokenError, TokenResult};
use tessera_ports::{Guard, KeyTtl, StoreOp};
use tracing::debug;

use crate::credential::{Credential, CredentialKind};
use crate::gateway::GuardedTransaction;
use crate::lifecycle;
use crate::limit::RefreshLimit;
use crate::manager::{Shared, ttl_secs};
use crate::metrics;
use crate::record::{self, Payload, RecordReader, RecordWriter, fields, validate_payload};

/// 签发参数
#[derive(Debug, Clone)]
pub struct TokenMeta {
    ttl: Duration,
    refresh_limit: Option<RefreshLimit>,
    ip: String,
    fingerprint: String,
}

impl TokenMeta {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            refresh_limit: None,
            ip: String::new(),
            fingerprint: String::new(),
        }
    }

    /// 覆盖管理器的默认刷新次数上限
    pub fn with_refresh_limit(mut self, limit: RefreshLimit) -> Self {
        self.refresh_limit = Some(limit);
        self
    }

    pub fn bind_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = ip.into();
        self
    }

    pub fn bind_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = fingerprint.into();
        self
    }
}

/// 链式令牌
#[derive(Clone)]
pub struct Token {
    shared: Arc<Shared>,
    value: String,
    created_at: i64,
    ttl: u64,
    expires_at: i64,
    refreshed_at: i64,
    refreshed_count: u32,
    refresh_limit: RefreshLimit,
    ip: String,
    fingerprint: String,
    child_token: Option<String>,
    payload: Payload,
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("value", &self.value)
            .field("created_at", &self.created_at)
            .field("ttl", &self.ttl)
            .field("expires_at", &self.expires_at)
            .field("refreshed_at", &self.refreshed_at)
            .field("refreshed_count", &self.refreshed_count)
            .field("refresh_limit", &self.refresh_limit)
            .field("ip", &self.ip)
            .field("fingerprint", &self.fingerprint)
            .field("child_token", &self.child_token)
            .field("payload", &self.payload)
            .finish()
    }
}

impl Token {
    fn prepare(shared: Arc<Shared>, meta: TokenMeta, payload: Payload) -> TokenResult<Self> {
        validate_payload(&payload)?;
        let ttl = ttl_secs(meta.ttl)?;
        let value = shared.generate()?;
        let now = record::now();
        let refresh_limit = meta.refresh_limit.unwrap_or(shared.options.refresh_limit);

        Ok(Self {
            shared,
            value,
            created_at: now,
            ttl,
            expires_at: now + ttl as i64,
            refreshed_at: 0,
            refreshed_count: 0,
            refresh_limit,
            ip: meta.ip,
            fingerprint: meta.fingerprint,
            child_token: None,
            payload,
        })
    }

    fn to_fields(&self) -> Vec<(String, String)> {
        RecordWriter::new()
            .number(fields::CREATED_AT, self.created_at)
            .number(fields::TTL, self.ttl)
            .number(fields::EXPIRES_AT, self.expires_at)
            .number(fields::REFRESHED_AT, self.refreshed_at)
            .number(fields::REFRESH_COUNT, self.refreshed_count)
            .number(fields::REFRESH_LIMIT, self.refresh_limit.to_wire())
            .text(fields::IP, self.ip.as_str())
            .text(fields::FINGERPRINT, self.fingerprint.as_str())
            .text(fields::CHILD_TOKEN, self.child_token.clone().unwrap_or_default())
            .payload(&self.payload)
            .into_fields()
    }

    pub(crate) async fn make(
        shared: Arc<Shared>,
        meta: TokenMeta,
        payload: Payload,
    ) -> TokenResult<Self> {
        let token = Self::prepare(shared.clone(), meta, payload)?;
        let key = token.key();
        let gateway = &shared.gateway;
        gateway
            .within(
                "make_token",
                lifecycle::create_record(
                    gateway,
                    &key,
                    token.to_fields(),
                    token.ttl(),
                    Vec::new(),
                ),
            )
            .await?;

        debug!(value = %token.value, ttl_secs = token.ttl, "Token issued");
        metrics::record_issued(CredentialKind::Chained);
        Ok(token)
    }

    pub(crate) async fn parse(shared: Arc<Shared>, value: &str) -> TokenResult<Self> {
        let result = Self::load(shared, value).await;
        if result.is_err() {
            metrics::record_parse_failure(CredentialKind::Chained);
        }
        result
    }

    async fn load(shared: Arc<Shared>, value: &str) -> TokenResult<Self> {
        shared.check_value(value)?;
        let key = shared.token_key(value);
        let all = shared
            .gateway
            .within("parse_token", shared.gateway.get_all(&key))
            .await?;

        let reader = RecordReader::new(all)?;
        let child_token = reader.text(fields::CHILD_TOKEN)?;
        Ok(Self {
            value: value.to_string(),
            created_at: reader.number(fields::CREATED_AT)?,
            ttl: reader.number(fields::TTL)?,
            expires_at: reader.number(fields::EXPIRES_AT)?,
            refreshed_at: reader.number(fields::REFRESHED_AT)?,
            refreshed_count: reader.number(fields::REFRESH_COUNT)?,
            refresh_limit: reader.refresh_limit()?,
            ip: reader.text(fields::IP)?,
            fingerprint: reader.text(fields::FINGERPRINT)?,
            child_token: Some(child_token).filter(|child| !child.is_empty()),
            payload: reader.into_payload(),
            shared,
        })
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }

    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    pub fn refreshed_at(&self) -> i64 {
        self.refreshed_at
    }

    pub fn refreshed_count(&self) -> u32 {
        self.refreshed_count
    }

    pub fn refresh_limit(&self) -> RefreshLimit {
        self.refresh_limit
    }

    /// 绑定的 IP，未绑定时为 `None`
    pub fn ip(&self) -> Option<&str> {
        Some(self.ip.as_str()).filter(|ip| !ip.is_empty())
    }

    pub fn fingerprint(&self) -> Option<&str> {
        Some(self.fingerprint.as_str()).filter(|fp| !fp.is_empty())
    }

    pub fn child_token(&self) -> Option<&str> {
        self.child_token.as_deref()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    fn key(&self) -> String {
        self.shared.token_key(&self.value)
    }

    /// 未绑定或完全相等时通过；引擎不会在其他操作中自动调用
    pub fn validate_ip(&self, ip: &str) -> bool {
        self.ip.is_empty() || self.ip == ip
    }

    pub fn validate_fingerprint(&self, fingerprint: &str) -> bool {
        self.fingerprint.is_empty() || self.fingerprint == fingerprint
    }

    /// 创建子令牌并在父令牌上记录子令牌值
    ///
    /// 子记录写入与父记录更新在同一事务中完成
    pub async fn make_child_token(
        &mut self,
        meta: TokenMeta,
        payload: Payload,
    ) -> TokenResult<Token> {
        if self.child_token.is_some() {
            return Err(TokenError::AlreadyHasChild);
        }

        let child = Self::prepare(self.shared.clone(), meta, payload)?;
        let parent_key = self.key();
        let child_key = child.key();
        let gateway = &self.shared.gateway;

        gateway
            .within("make_child_token", async {
                if gateway.exists(&child_key).await? {
                    return Err(TokenError::Collision);
                }

                let mut tx = GuardedTransaction::new();
                tx.guard(Guard::present(&parent_key), TokenError::InvalidToken)
                    .guard(
                        Guard::field_equals(&parent_key, fields::CHILD_TOKEN, ""),
                        TokenError::AlreadyHasChild,
                    )
                    .guard(Guard::absent(&child_key), TokenError::Collision)
                    .op(StoreOp::set_fields(&child_key, child.to_fields()))
                    .op(StoreOp::expire(&child_key, child.ttl()))
                    .op(StoreOp::set_fields(
                        &parent_key,
                        vec![(fields::CHILD_TOKEN.to_string(), child.value.clone())],
                    ));
                gateway.commit(tx).await
            })
            .await?;

        debug!(parent = %self.value, child = %child.value, "Child token issued");
        metrics::record_issued(CredentialKind::Chained);
        self.child_token = Some(child.value.clone());
        Ok(child)
    }

    /// 刷新；`Disabled` 或达到上限时拒绝
    pub async fn refresh(&mut self) -> TokenResult<()> {
        self.refresh_limit.check(self.refreshed_count)?;

        let key = self.key();
        let gateway = &self.shared.gateway;
        let refreshed = gateway
            .within(
                "refresh_token",
                lifecycle::refresh_record(gateway, &key, self.ttl(), self.refresh_limit),
            )
            .await?;

        self.refreshed_at = refreshed.refreshed_at;
        self.expires_at = refreshed.expires_at;
        self.refreshed_count = refreshed.refresh_count;
        metrics::record_refreshed(CredentialKind::Chained);
        Ok(())
    }

    pub async fn get(&self, field: &str) -> TokenResult<Option<String>> {
        let key = self.key();
        let gateway = &self.shared.gateway;
        gateway
            .within("token_get", lifecycle::read_field(gateway, &key, field))
            .await
    }

    pub async fn get_all(&self, include_metadata: bool) -> TokenResult<Payload> {
        let key = self.key();
        let gateway = &self.shared.gateway;
        gateway
            .within(
                "token_get_all",
                lifecycle::read_all(gateway, &key, include_metadata),
            )
            .await
    }

    pub async fn set(&mut self, field: &str, value: impl Into<String>) -> TokenResult<()> {
        let value = value.into();
        let key = self.key();
        let gateway = &self.shared.gateway;
        gateway
            .within("token_set", lifecycle::write_field(gateway, &key, field, &value))
            .await?;
        self.payload.insert(field.to_string(), value);
        Ok(())
    }

    /// 销毁令牌；`cascade` 为 true 时一并删除子令牌（只向下一层）
    pub async fn destroy(&self, cascade: bool) -> TokenResult<()> {
        Self::destroy_by_value(&self.shared, &self.value, cascade).await
    }

    /// 子令牌值从存储重新读取，父子两个键在同一事务中删除
    pub(crate) async fn destroy_by_value(
        shared: &Shared,
        value: &str,
        cascade: bool,
    ) -> TokenResult<()> {
        let key = shared.token_key(value);
        let gateway = &shared.gateway;
        let child = gateway
            .within("destroy_token", async {
                if cascade {
                    lifecycle::destroy_linked(gateway, &key, fields::CHILD_TOKEN, |child| {
                        shared.token_key(child)
                    })
                    .await
                } else {
                    gateway.delete(&[key.clone()]).await.map(|_| None)
                }
            })
            .await?;

        debug!(
            value = %value,
            cascade = cascade,
            child_token = child.as_deref().unwrap_or(""),
            "Token destroyed"
        );
        metrics::record_revoked(CredentialKind::Chained);
        Ok(())
    }

    /// 存储侧剩余存活时间
    pub async fn remaining_ttl(&self) -> TokenResult<KeyTtl> {
        let key = self.key();
        let gateway = &self.shared.gateway;
        gateway.within("token_ttl", gateway.ttl(&key)).await
    }
}

#[async_trait]
impl Credential for Token {
    fn kind(&self) -> CredentialKind {
        CredentialKind::Chained
    }

    fn value(&self) -> &str {
        &self.value
    }

    fn created_at(&self) -> i64 {
        self.created_at
    }

    fn expires_at(&self) -> i64 {
        self.expires_at
    }

    fn payload(&self) -> &Payload {
        &self.payload
    }

    async fn revoke(&self) -> TokenResult<()> {
        self.destroy(false).await
    }
}
