//! 访问令牌

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tessera_errors::TokenResult;
use tessera_ports::KeyTtl;
use tracing::debug;

use crate::credential::{Credential, CredentialKind};
use crate::lifecycle;
use crate::limit::RefreshLimit;
use crate::manager::{Shared, ttl_secs};
use crate::metrics;
use crate::record::{self, Payload, RecordReader, RecordWriter, fields, validate_payload};

/// 短期访问凭证
///
/// 内存中的字段只是存储记录的投影，每次解析都从存储重新读取
#[derive(Clone)]
pub struct AccessToken {
    shared: Arc<Shared>,
    value: String,
    created_at: i64,
    expires_at: i64,
    refreshed_at: i64,
    refresh_count: u32,
    ttl: u64,
    refresh_limit: RefreshLimit,
    payload: Payload,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &self.value)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .field("refreshed_at", &self.refreshed_at)
            .field("refresh_count", &self.refresh_count)
            .field("ttl", &self.ttl)
            .field("refresh_limit", &self.refresh_limit)
            .field("payload", &self.payload)
            .finish()
    }
}

impl AccessToken {
    pub(crate) async fn issue(
        shared: Arc<Shared>,
        payload: Payload,
        ttl: Duration,
    ) -> TokenResult<Self> {
        validate_payload(&payload)?;
        let ttl = ttl_secs(ttl)?;
        let value = shared.generate()?;
        let key = shared.access_key(&value);
        let token = Self::fresh(shared.clone(), value, ttl, payload);

        shared
            .gateway
            .within(
                "issue_access_token",
                lifecycle::create_record(
                    &shared.gateway,
                    &key,
                    token.to_fields(),
                    Duration::from_secs(ttl),
                    Vec::new(),
                ),
            )
            .await?;

        debug!(value = %token.value, ttl_secs = ttl, "Access token issued");
        metrics::record_issued(CredentialKind::Access);
        Ok(token)
    }

    /// 新签发（或兑换产生）的令牌，尚未写入存储
    pub(crate) fn fresh(shared: Arc<Shared>, value: String, ttl: u64, payload: Payload) -> Self {
        let now = record::now();
        let refresh_limit = shared.options.refresh_limit;
        Self {
            shared,
            value,
            created_at: now,
            expires_at: now + ttl as i64,
            refreshed_at: 0,
            refresh_count: 0,
            ttl,
            refresh_limit,
            payload,
        }
    }

    pub(crate) fn to_fields(&self) -> Vec<(String, String)> {
        RecordWriter::new()
            .number(fields::CREATED_AT, self.created_at)
            .number(fields::TTL, self.ttl)
            .number(fields::EXPIRES_AT, self.expires_at)
            .number(fields::REFRESHED_AT, self.refreshed_at)
            .number(fields::REFRESH_COUNT, self.refresh_count)
            .number(fields::REFRESH_LIMIT, self.refresh_limit.to_wire())
            .payload(&self.payload)
            .into_fields()
    }

    pub(crate) async fn parse(shared: Arc<Shared>, value: &str) -> TokenResult<Self> {
        let result = Self::load(shared, value).await;
        if result.is_err() {
            metrics::record_parse_failure(CredentialKind::Access);
        }
        result
    }

    async fn load(shared: Arc<Shared>, value: &str) -> TokenResult<Self> {
        shared.check_value(value)?;
        let key = shared.access_key(value);
        let all = shared
            .gateway
            .within("parse_access_token", shared.gateway.get_all(&key))
            .await?;

        let reader = RecordReader::new(all)?;
        Ok(Self {
            value: value.to_string(),
            created_at: reader.number(fields::CREATED_AT)?,
            expires_at: reader.number(fields::EXPIRES_AT)?,
            refreshed_at: reader.number(fields::REFRESHED_AT)?,
            refresh_count: reader.number(fields::REFRESH_COUNT)?,
            ttl: reader.number(fields::TTL)?,
            refresh_limit: reader.refresh_limit()?,
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

    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    pub fn refreshed_at(&self) -> i64 {
        self.refreshed_at
    }

    pub fn refresh_count(&self) -> u32 {
        self.refresh_count
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }

    pub fn refresh_limit(&self) -> RefreshLimit {
        self.refresh_limit
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    fn key(&self) -> String {
        self.shared.access_key(&self.value)
    }

    /// 从存储读取单个荷载字段
    pub async fn get(&self, field: &str) -> TokenResult<Option<String>> {
        let key = self.key();
        let gateway = &self.shared.gateway;
        gateway
            .within("access_token_get", lifecycle::read_field(gateway, &key, field))
            .await
    }

    /// 从存储读取全部字段，`include_metadata` 为 false 时只返回荷载
    pub async fn get_all(&self, include_metadata: bool) -> TokenResult<Payload> {
        let key = self.key();
        let gateway = &self.shared.gateway;
        gateway
            .within(
                "access_token_get_all",
                lifecycle::read_all(gateway, &key, include_metadata),
            )
            .await
    }

    /// 写入单个荷载字段
    pub async fn set(&mut self, field: &str, value: impl Into<String>) -> TokenResult<()> {
        let value = value.into();
        let key = self.key();
        let gateway = &self.shared.gateway;
        gateway
            .within(
                "access_token_set",
                lifecycle::write_field(gateway, &key, field, &value),
            )
            .await?;
        self.payload.insert(field.to_string(), value);
        Ok(())
    }

    /// 刷新：计数加一并把过期时间重置为签发时的 TTL
    pub async fn refresh(&mut self) -> TokenResult<()> {
        let key = self.key();
        let gateway = &self.shared.gateway;
        let refreshed = gateway
            .within(
                "refresh_access_token",
                lifecycle::refresh_record(
                    gateway,
                    &key,
                    Duration::from_secs(self.ttl),
                    self.refresh_limit,
                ),
            )
            .await?;

        self.refreshed_at = refreshed.refreshed_at;
        self.expires_at = refreshed.expires_at;
        self.refresh_count = refreshed.refresh_count;
        metrics::record_refreshed(CredentialKind::Access);
        Ok(())
    }

    /// 删除记录，不存在时同样成功
    pub async fn destroy(&self) -> TokenResult<()> {
        let key = self.key();
        let gateway = &self.shared.gateway;
        gateway
            .within("destroy_access_token", gateway.delete(&[key]))
            .await?;
        debug!(value = %self.value, "Access token destroyed");
        metrics::record_revoked(CredentialKind::Access);
        Ok(())
    }

    /// 存储侧剩余存活时间
    pub async fn remaining_ttl(&self) -> TokenResult<KeyTtl> {
        let key = self.key();
        let gateway = &self.shared.gateway;
        gateway.within("access_token_ttl", gateway.ttl(&key)).await
    }
}

#[async_trait]
impl Credential for AccessToken {
    fn kind(&self) -> CredentialKind {
        CredentialKind::Access
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
        self.destroy().await
    }
}
