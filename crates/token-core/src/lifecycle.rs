//! 各类令牌共用的记录操作：创建、刷新、字段读写

use std::time::Duration;
use tessera_errors::{TokenError, TokenResult};
use tessera_ports::{Guard, StoreOp};
use tracing::debug;

use crate::gateway::{GuardedTransaction, StoreGateway};
use crate::limit::RefreshLimit;
use crate::record::{self, Payload, RecordWriter, fields, is_reserved};

/// 刷新后的元数据
#[derive(Debug, Clone, Copy)]
pub(crate) struct Refreshed {
    pub refreshed_at: i64,
    pub expires_at: i64,
    pub refresh_count: u32,
}

/// 在键不存在的前提下写入新记录并设置过期时间
///
/// 事务前先检查一次是否存在，事务内再用守卫检查一次
pub(crate) async fn create_record(
    gateway: &StoreGateway,
    key: &str,
    fields: Vec<(String, String)>,
    ttl: Duration,
    preconditions: Vec<(Guard, TokenError)>,
) -> TokenResult<()> {
    if gateway.exists(key).await? {
        return Err(TokenError::Collision);
    }

    let mut tx = GuardedTransaction::new();
    tx.guard(Guard::absent(key), TokenError::Collision);
    for (guard, on_reject) in preconditions {
        tx.guard(guard, on_reject);
    }
    tx.op(StoreOp::set_fields(key, fields))
        .op(StoreOp::expire(key, ttl));
    gateway.commit(tx).await
}

/// 刷新记录：计数加一，重新计算到期时间，重置存储过期时间
///
/// 计数从存储重新读取，并在事务中校验未被并发修改
pub(crate) async fn refresh_record(
    gateway: &StoreGateway,
    key: &str,
    ttl: Duration,
    limit: RefreshLimit,
) -> TokenResult<Refreshed> {
    if limit == RefreshLimit::Disabled {
        return Err(TokenError::RefreshDisabled);
    }

    let current = gateway
        .get_field(key, fields::REFRESH_COUNT)
        .await?
        .ok_or(TokenError::InvalidToken)?;
    let refresh_count: u32 = current.parse().map_err(|_| TokenError::InvalidToken)?;
    limit.check(refresh_count)?;

    let refreshed_at = record::now();
    let refreshed = Refreshed {
        refreshed_at,
        expires_at: refreshed_at + ttl.as_secs() as i64,
        refresh_count: refresh_count + 1,
    };

    let updates = RecordWriter::new()
        .number(fields::REFRESH_COUNT, refreshed.refresh_count)
        .number(fields::REFRESHED_AT, refreshed.refreshed_at)
        .number(fields::EXPIRES_AT, refreshed.expires_at)
        .into_fields();

    let mut tx = GuardedTransaction::new();
    tx.guard(Guard::present(key), TokenError::InvalidToken)
        .guard(
            Guard::field_equals(key, fields::REFRESH_COUNT, current),
            TokenError::ConcurrentUpdate,
        )
        .op(StoreOp::set_fields(key, updates))
        .op(StoreOp::expire(key, ttl));
    gateway.commit(tx).await?;

    debug!(refresh_count = refreshed.refresh_count, "Record refreshed");
    Ok(refreshed)
}

/// 读取单个荷载字段
pub(crate) async fn read_field(
    gateway: &StoreGateway,
    key: &str,
    field: &str,
) -> TokenResult<Option<String>> {
    if is_reserved(field) {
        return Err(TokenError::reserved_field(field));
    }
    match gateway.get_field(key, field).await? {
        Some(value) => Ok(Some(value)),
        None if gateway.exists(key).await? => Ok(None),
        None => Err(TokenError::InvalidToken),
    }
}

/// 读取全部字段，`include_metadata` 为 false 时剥离保留字段
pub(crate) async fn read_all(
    gateway: &StoreGateway,
    key: &str,
    include_metadata: bool,
) -> TokenResult<Payload> {
    let all = gateway.get_all(key).await?;
    if all.is_empty() {
        return Err(TokenError::InvalidToken);
    }
    Ok(record::project(all, include_metadata))
}

/// 写入单个荷载字段；记录必须仍然存在，避免写出一个没有过期时间的残留哈希
pub(crate) async fn write_field(
    gateway: &StoreGateway,
    key: &str,
    field: &str,
    value: &str,
) -> TokenResult<()> {
    if is_reserved(field) {
        return Err(TokenError::reserved_field(field));
    }
    let mut tx = GuardedTransaction::new();
    tx.guard(Guard::present(key), TokenError::InvalidToken)
        .op(StoreOp::set_fields(
            key,
            vec![(field.to_string(), value.to_string())],
        ));
    gateway.commit(tx).await
}

/// 删除记录，并在同一事务中删除其链接字段指向的记录
///
/// 链接字段由守卫固定；读取与提交之间链接被改写时重新读取一次，
/// 仍然冲突则返回 `ConcurrentUpdate`。返回被删除的链接值。
pub(crate) async fn destroy_linked<F>(
    gateway: &StoreGateway,
    key: &str,
    link_field: &str,
    link_key: F,
) -> TokenResult<Option<String>>
where
    F: Fn(&str) -> String,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        let linked = gateway.get_field(key, link_field).await?;

        let mut tx = GuardedTransaction::new();
        match linked.as_deref() {
            Some(value) => {
                tx.guard(
                    Guard::field_equals(key, link_field, value),
                    TokenError::ConcurrentUpdate,
                );
                tx.op(StoreOp::delete(key));
                if !value.is_empty() {
                    tx.op(StoreOp::delete(link_key(value)));
                }
            }
            // 记录不存在时无需守卫，删除是幂等的
            None => {
                tx.op(StoreOp::delete(key));
            }
        }

        match gateway.commit(tx).await {
            Ok(()) => return Ok(linked.filter(|value| !value.is_empty())),
            Err(TokenError::ConcurrentUpdate) if attempts < 2 => {
                debug!(link_field = link_field, "Link changed before delete, re-reading");
            }
            Err(e) => return Err(e),
        }
    }
}
