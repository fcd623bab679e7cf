//! Token Metrics
//!
//! 令牌生命周期指标记录

use metrics::{counter, histogram};
use std::time::Instant;

use crate::credential::CredentialKind;
use crate::manager::ExchangePolicy;

// ============================================================================
// 生命周期 Metrics
// ============================================================================

/// 记录令牌签发
pub fn record_issued(kind: CredentialKind) {
    let labels = [("kind", kind.as_str())];
    counter!("tessera_tokens_issued_total", &labels).increment(1);
}

/// 记录令牌刷新
pub fn record_refreshed(kind: CredentialKind) {
    let labels = [("kind", kind.as_str())];
    counter!("tessera_tokens_refreshed_total", &labels).increment(1);
}

/// 记录刷新令牌兑换
pub fn record_exchanged(policy: ExchangePolicy) {
    let labels = [("policy", policy.as_str())];
    counter!("tessera_tokens_exchanged_total", &labels).increment(1);
}

/// 记录令牌销毁
pub fn record_revoked(kind: CredentialKind) {
    let labels = [("kind", kind.as_str())];
    counter!("tessera_tokens_revoked_total", &labels).increment(1);
}

/// 记录解析失败（格式错误、不存在或已过期）
pub fn record_parse_failure(kind: CredentialKind) {
    let labels = [("kind", kind.as_str())];
    counter!("tessera_token_parse_failures_total", &labels).increment(1);
}

// ============================================================================
// 存储操作时间 Metrics
// ============================================================================

/// 令牌操作计时器
pub struct OperationTimer {
    start: Instant,
    operation: &'static str,
}

impl OperationTimer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }

    pub fn finish(self, outcome: &'static str) {
        let duration = self.start.elapsed().as_secs_f64() * 1000.0;
        let labels = [("operation", self.operation), ("outcome", outcome)];

        histogram!("tessera_operation_duration_ms", &labels).record(duration);
    }
}
