//! Redis TokenStore 实现

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, Script};
use std::collections::HashMap;
use tessera_errors::{TokenError, TokenResult};
use tessera_ports::{CommitOutcome, KeyTtl, TokenStore, Transaction};
use tracing::debug;

use crate::connection::check_connection;
use crate::script::{COMMIT_SCRIPT, encode};

/// Redis 令牌存储
///
/// 每次调用克隆一份 `ConnectionManager`（内部共享同一条多路复用连接），
/// 调用结束即释放
#[derive(Clone)]
pub struct RedisTokenStore {
    conn: ConnectionManager,
    commit_script: Script,
}

impl RedisTokenStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            commit_script: Script::new(COMMIT_SCRIPT),
        }
    }
}

fn store_error(operation: &str, e: RedisError) -> TokenError {
    if e.is_timeout() {
        return TokenError::Timeout;
    }
    TokenError::store(format!("Redis {} failed: {}", operation, e))
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn exists(&self, key: &str) -> TokenResult<bool> {
        let mut conn = self.conn.clone();
        conn.exists(key)
            .await
            .map_err(|e| store_error("exists", e))
    }

    async fn get_field(&self, key: &str, field: &str) -> TokenResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.hget(key, field)
            .await
            .map_err(|e| store_error("hget", e))
    }

    async fn get_all(&self, key: &str) -> TokenResult<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        conn.hgetall(key)
            .await
            .map_err(|e| store_error("hgetall", e))
    }

    async fn set_fields(&self, key: &str, fields: &[(String, String)]) -> TokenResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.hset_multiple(key, fields)
            .await
            .map_err(|e| store_error("hset", e))
    }

    async fn ttl(&self, key: &str) -> TokenResult<KeyTtl> {
        let mut conn = self.conn.clone();
        let ttl: i64 = conn.ttl(key).await.map_err(|e| store_error("ttl", e))?;
        Ok(KeyTtl::from_redis(ttl))
    }

    async fn delete(&self, keys: &[String]) -> TokenResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        conn.del(keys).await.map_err(|e| store_error("del", e))
    }

    async fn commit(&self, tx: &Transaction) -> TokenResult<CommitOutcome> {
        let encoded = encode(tx)?;
        let mut conn = self.conn.clone();

        let mut invocation = self.commit_script.prepare_invoke();
        for key in &encoded.keys {
            invocation.key(key);
        }
        invocation.arg(&encoded.program);

        let rejected: i64 = invocation.invoke_async(&mut conn).await.map_err(|e| {
            if e.is_timeout() || e.is_io_error() || e.is_connection_dropped() {
                store_error("commit", e)
            } else {
                // 脚本执行出错（例如键类型不对），Redis 会中止脚本
                TokenError::transaction_aborted(e.to_string())
            }
        })?;

        if rejected == 0 {
            debug!(keys = encoded.keys.len(), "Transaction committed");
            Ok(CommitOutcome::Committed)
        } else {
            let guard = (rejected - 1) as usize;
            debug!(guard = guard, "Transaction guard rejected");
            Ok(CommitOutcome::Rejected { guard })
        }
    }

    async fn ping(&self) -> TokenResult<()> {
        let mut conn = self.conn.clone();
        check_connection(&mut conn).await
    }
}
