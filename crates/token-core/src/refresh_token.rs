//! 刷新令牌与兑换（轮换）协议

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tessera_errors::{TokenError, TokenResult};
use tessera_ports::{Guard, KeyTtl, StoreOp};
use tracing::{debug, info};

use crate::access_token::AccessToken;
use crate::credential::{Credential, CredentialKind};
use crate::gateway::GuardedTransaction;
use crate::lifecycle;
use crate::manager::{ExchangePolicy, Shared, ttl_secs};
use crate::metrics;
use crate::record::{self, Payload, RecordReader, RecordWriter, fields, validate_payload};

/// 长期凭证，可兑换新的访问令牌
#[derive(Clone)]
pub struct RefreshToken {
    shared: Arc<Shared>,
    value: String,
    access_token: String,
    created_at: i64,
    expires_at: i64,
    use_count: u32,
    used_at: i64,
    payload: Payload,
}

impl std::fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshToken")
            .field("value", &self.value)
            .field("access_token", &self.access_token)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .field("use_count", &self.use_count)
            .field("used_at", &self.used_at)
            .field("payload", &self.payload)
            .finish()
    }
}

/// 兑换事务提交后需要回写到内存的状态
struct Exchanged {
    access_token: AccessToken,
    used_at: i64,
    use_count: u32,
    rotated: Option<(String, i64, i64)>,
}

impl RefreshToken {
    pub(crate) async fn issue(
        shared: Arc<Shared>,
        access_token: &str,
        payload: Payload,
        ttl: Duration,
    ) -> TokenResult<Self> {
        validate_payload(&payload)?;
        shared.check_value(access_token)?;
        let ttl = ttl_secs(ttl)?;

        let value = shared.generate()?;
        let now = record::now();
        let token = Self {
            shared: shared.clone(),
            value,
            access_token: access_token.to_string(),
            created_at: now,
            expires_at: now + ttl as i64,
            use_count: 0,
            used_at: 0,
            payload,
        };

        let key = shared.refresh_key(&token.value);
        let access_key = shared.access_key(access_token);
        let gateway = &shared.gateway;
        gateway
            .within("issue_refresh_token", async {
                if !gateway.exists(&access_key).await? {
                    return Err(TokenError::InvalidToken);
                }
                lifecycle::create_record(
                    gateway,
                    &key,
                    token.to_fields(),
                    Duration::from_secs(ttl),
                    vec![(Guard::present(&access_key), TokenError::InvalidToken)],
                )
                .await
            })
            .await?;

        debug!(value = %token.value, ttl_secs = ttl, "Refresh token issued");
        metrics::record_issued(CredentialKind::Refresh);
        Ok(token)
    }

    fn to_fields(&self) -> Vec<(String, String)> {
        RecordWriter::new()
            .text(fields::ACCESS_TOKEN, self.access_token.as_str())
            .number(fields::CREATED_AT, self.created_at)
            .number(fields::EXPIRES_AT, self.expires_at)
            .number(fields::USE_COUNT, self.use_count)
            .number(fields::USED_AT, self.used_at)
            .payload(&self.payload)
            .into_fields()
    }

    pub(crate) async fn parse(shared: Arc<Shared>, value: &str) -> TokenResult<Self> {
        let result = Self::load(shared, value).await;
        if result.is_err() {
            metrics::record_parse_failure(CredentialKind::Refresh);
        }
        result
    }

    async fn load(shared: Arc<Shared>, value: &str) -> TokenResult<Self> {
        shared.check_value(value)?;
        let key = shared.refresh_key(value);
        let all = shared
            .gateway
            .within("parse_refresh_token", shared.gateway.get_all(&key))
            .await?;

        let reader = RecordReader::new(all)?;
        Ok(Self {
            value: value.to_string(),
            access_token: reader.text(fields::ACCESS_TOKEN)?,
            created_at: reader.number(fields::CREATED_AT)?,
            expires_at: reader.number(fields::EXPIRES_AT)?,
            use_count: reader.number(fields::USE_COUNT)?,
            used_at: reader.number(fields::USED_AT)?,
            payload: reader.into_payload(),
            shared,
        })
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// 当前绑定的访问令牌值
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    pub fn use_count(&self) -> u32 {
        self.use_count
    }

    pub fn used_at(&self) -> i64 {
        self.used_at
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// 兑换新的访问令牌
    ///
    /// 删除旧访问令牌、写入新访问令牌、更新（或轮换）刷新令牌在同一个事务中完成。
    /// 新访问令牌的荷载是刷新令牌荷载叠加调用方荷载。
    pub async fn exchange(&mut self, payload: Payload) -> TokenResult<AccessToken> {
        validate_payload(&payload)?;
        if self.expires_at < record::now() {
            return Err(TokenError::Expired);
        }

        let policy = self.shared.options.exchange_policy;
        let exchanged = self
            .shared
            .gateway
            .within("exchange_refresh_token", self.commit_exchange(payload, policy))
            .await?;

        self.access_token = exchanged.access_token.value().to_string();
        self.use_count = exchanged.use_count;
        self.used_at = exchanged.used_at;
        if let Some((value, created_at, expires_at)) = exchanged.rotated {
            self.value = value;
            self.created_at = created_at;
            self.expires_at = expires_at;
        }

        info!(
            policy = policy.as_str(),
            use_count = self.use_count,
            "Refresh token exchanged"
        );
        metrics::record_exchanged(policy);
        metrics::record_issued(CredentialKind::Access);
        Ok(exchanged.access_token)
    }

    async fn commit_exchange(
        &self,
        payload: Payload,
        policy: ExchangePolicy,
    ) -> TokenResult<Exchanged> {
        let shared = &self.shared;
        let gateway = &shared.gateway;
        let key = shared.refresh_key(&self.value);

        let current = gateway
            .get_field(&key, fields::USE_COUNT)
            .await?
            .ok_or(TokenError::InvalidToken)?;
        let use_count: u32 = current.parse().map_err(|_| TokenError::InvalidToken)?;

        let mut merged = self.payload.clone();
        merged.extend(payload);

        let access_ttl = shared.options.access_token_ttl;
        let access_value = shared.generate()?;
        let access_key = shared.access_key(&access_value);
        let access_token = AccessToken::fresh(
            shared.clone(),
            access_value,
            ttl_secs(access_ttl)?,
            merged,
        );

        let used_at = record::now();
        let use_count = use_count + 1;

        let mut tx = GuardedTransaction::new();
        tx.guard(Guard::present(&key), TokenError::InvalidToken)
            .guard(
                Guard::field_equals(&key, fields::ACCESS_TOKEN, self.access_token.as_str()),
                TokenError::TokenMismatch,
            )
            .guard(
                Guard::field_equals(&key, fields::USE_COUNT, current),
                TokenError::ConcurrentUpdate,
            )
            .guard(Guard::absent(&access_key), TokenError::Collision);

        let mut rotated = None;
        // 新记录全部写入后才删除旧记录
        let mut ops = vec![
            StoreOp::set_fields(&access_key, access_token.to_fields()),
            StoreOp::expire(&access_key, access_ttl),
        ];

        match policy {
            ExchangePolicy::Reusable => {
                let updates = RecordWriter::new()
                    .text(fields::ACCESS_TOKEN, access_token.value())
                    .number(fields::USE_COUNT, use_count)
                    .number(fields::USED_AT, used_at)
                    .into_fields();
                ops.push(StoreOp::set_fields(&key, updates));
            }
            ExchangePolicy::Rotate => {
                let refresh_ttl = shared.refresh_token_ttl()?;
                let value = shared.generate()?;
                let new_key = shared.refresh_key(&value);
                let created_at = used_at;
                let expires_at = created_at + ttl_secs(refresh_ttl)? as i64;

                let successor = Self {
                    shared: shared.clone(),
                    value: value.clone(),
                    access_token: access_token.value().to_string(),
                    created_at,
                    expires_at,
                    use_count,
                    used_at,
                    payload: self.payload.clone(),
                };

                tx.guard(Guard::absent(&new_key), TokenError::Collision);
                ops.push(StoreOp::set_fields(&new_key, successor.to_fields()));
                ops.push(StoreOp::expire(&new_key, refresh_ttl));
                ops.push(StoreOp::delete(&key));
                rotated = Some((value, created_at, expires_at));
            }
        }

        ops.push(StoreOp::delete(shared.access_key(&self.access_token)));
        for op in ops {
            tx.op(op);
        }
        gateway.commit(tx).await?;

        Ok(Exchanged {
            access_token,
            used_at,
            use_count,
            rotated,
        })
    }

    /// 删除刷新令牌；`also_delete_access_token` 为 true 时一并删除当前绑定的访问令牌
    pub async fn destroy(&self, also_delete_access_token: bool) -> TokenResult<()> {
        Self::destroy_by_value(&self.shared, &self.value, also_delete_access_token).await
    }

    /// 绑定的访问令牌值从存储重新读取，两个键在同一事务中删除
    pub(crate) async fn destroy_by_value(
        shared: &Shared,
        value: &str,
        also_delete_access_token: bool,
    ) -> TokenResult<()> {
        let key = shared.refresh_key(value);
        let gateway = &shared.gateway;
        let bound = gateway
            .within("destroy_refresh_token", async {
                if also_delete_access_token {
                    lifecycle::destroy_linked(gateway, &key, fields::ACCESS_TOKEN, |bound| {
                        shared.access_key(bound)
                    })
                    .await
                } else {
                    gateway.delete(&[key.clone()]).await.map(|_| None)
                }
            })
            .await?;

        debug!(
            value = %value,
            access_token = bound.as_deref().unwrap_or(""),
            "Refresh token destroyed"
        );
        metrics::record_revoked(CredentialKind::Refresh);
        Ok(())
    }

    /// 存储侧剩余存活时间
    pub async fn remaining_ttl(&self) -> TokenResult<KeyTtl> {
        let key = self.shared.refresh_key(&self.value);
        let gateway = &self.shared.gateway;
        gateway.within("refresh_token_ttl", gateway.ttl(&key)).await
    }
}

#[async_trait]
impl Credential for RefreshToken {
    fn kind(&self) -> CredentialKind {
        CredentialKind::Refresh
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
