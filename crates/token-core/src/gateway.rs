//! 存储访问入口
//!
//! 每个公开操作整体受同一个超时约束。超时后事务是否已提交是未知的，
//! 调用方需要重新解析令牌确认实际状态。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tessera_errors::{TokenError, TokenResult};
use tessera_ports::{CommitOutcome, Guard, KeyTtl, StoreOp, TokenStore, Transaction};
use tracing::warn;

use crate::metrics::OperationTimer;

#[derive(Clone)]
pub(crate) struct StoreGateway {
    store: Arc<dyn TokenStore>,
    timeout: Duration,
}

impl StoreGateway {
    pub fn new(store: Arc<dyn TokenStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// 在操作超时内执行
    pub async fn within<T, F>(&self, operation: &'static str, fut: F) -> TokenResult<T>
    where
        F: Future<Output = TokenResult<T>>,
    {
        let timer = OperationTimer::new(operation);
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => {
                timer.finish(if result.is_ok() { "ok" } else { "error" });
                result
            }
            Err(_) => {
                timer.finish("timeout");
                warn!(
                    operation = operation,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Token operation timed out"
                );
                Err(TokenError::Timeout)
            }
        }
    }

    pub async fn exists(&self, key: &str) -> TokenResult<bool> {
        self.store.exists(key).await
    }

    pub async fn get_field(&self, key: &str, field: &str) -> TokenResult<Option<String>> {
        self.store.get_field(key, field).await
    }

    pub async fn get_all(
        &self,
        key: &str,
    ) -> TokenResult<std::collections::HashMap<String, String>> {
        self.store.get_all(key).await
    }

    pub async fn ttl(&self, key: &str) -> TokenResult<KeyTtl> {
        self.store.ttl(key).await
    }

    pub async fn delete(&self, keys: &[String]) -> TokenResult<u64> {
        self.store.delete(keys).await
    }

    pub async fn ping(&self) -> TokenResult<()> {
        self.store.ping().await
    }

    pub async fn commit(&self, tx: GuardedTransaction) -> TokenResult<()> {
        let GuardedTransaction { tx, mut rejections } = tx;
        match self.store.commit(&tx).await? {
            CommitOutcome::Committed => Ok(()),
            CommitOutcome::Rejected { guard } if guard < rejections.len() => {
                Err(rejections.swap_remove(guard))
            }
            CommitOutcome::Rejected { guard } => Err(TokenError::transaction_aborted(format!(
                "store rejected unknown guard {}",
                guard
            ))),
        }
    }
}

/// 带有失败映射的事务：每个守卫对应一个未通过时返回的错误
#[derive(Debug, Default)]
pub(crate) struct GuardedTransaction {
    tx: Transaction,
    rejections: Vec<TokenError>,
}

impl GuardedTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guard(&mut self, guard: Guard, on_reject: TokenError) -> &mut Self {
        self.tx.guard(guard);
        self.rejections.push(on_reject);
        self
    }

    pub fn op(&mut self, op: StoreOp) -> &mut Self {
        self.tx.op(op);
        self
    }
}
