//! 存储事务定义
//!
//! 一个事务由有序的守卫和有序的写操作组成。
//! 存储实现必须保证：守卫检查与写操作之间没有其他客户端的写入插入，
//! 任意守卫失败时不执行任何写操作。

use std::time::Duration;

/// 事务守卫
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    /// 键必须不存在
    Absent { key: String },
    /// 键必须存在
    Present { key: String },
    /// 字段值必须等于给定值（键不存在或字段不存在都视为不相等）
    FieldEquals {
        key: String,
        field: String,
        value: String,
    },
}

impl Guard {
    pub fn absent(key: impl Into<String>) -> Self {
        Self::Absent { key: key.into() }
    }

    pub fn present(key: impl Into<String>) -> Self {
        Self::Present { key: key.into() }
    }

    pub fn field_equals(
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::FieldEquals {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Absent { key } | Self::Present { key } | Self::FieldEquals { key, .. } => key,
        }
    }
}

/// 事务写操作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// 写入字段
    SetFields {
        key: String,
        fields: Vec<(String, String)>,
    },
    /// 设置整键过期时间（秒）
    Expire { key: String, seconds: u64 },
    /// 删除键
    Delete { key: String },
}

impl StoreOp {
    pub fn set_fields(key: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        Self::SetFields {
            key: key.into(),
            fields,
        }
    }

    pub fn expire(key: impl Into<String>, ttl: Duration) -> Self {
        Self::Expire {
            key: key.into(),
            seconds: ttl.as_secs(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete { key: key.into() }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::SetFields { key, .. } | Self::Expire { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// 存储事务
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    guards: Vec<Guard>,
    ops: Vec<StoreOp>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加守卫，返回该守卫的序号
    pub fn guard(&mut self, guard: Guard) -> usize {
        self.guards.push(guard);
        self.guards.len() - 1
    }

    /// 追加写操作
    pub fn op(&mut self, op: StoreOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn guards(&self) -> &[Guard] {
        &self.guards
    }

    pub fn ops(&self) -> &[StoreOp] {
        &self.ops
    }

    /// 事务涉及的全部键，按首次出现顺序去重
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        let all = self
            .guards
            .iter()
            .map(Guard::key)
            .chain(self.ops.iter().map(StoreOp::key));
        for key in all {
            if !keys.iter().any(|k| k == key) {
                keys.push(key.to_string());
            }
        }
        keys
    }
}

/// 事务提交结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// 全部写操作已生效
    Committed,
    /// 第 `guard` 个守卫（从 0 开始）未通过，没有任何写操作生效
    Rejected { guard: usize },
}

impl CommitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_indices_follow_insertion_order() {
        let mut tx = Transaction::new();
        assert_eq!(tx.guard(Guard::present("a")), 0);
        assert_eq!(tx.guard(Guard::absent("b")), 1);
        assert_eq!(tx.guards().len(), 2);
    }

    #[test]
    fn test_keys_are_deduplicated_in_first_seen_order() {
        let mut tx = Transaction::new();
        tx.guard(Guard::present("refresh:1"));
        tx.guard(Guard::absent("access:2"));
        tx.op(StoreOp::delete("access:1"))
            .op(StoreOp::set_fields("access:2", vec![("a".into(), "b".into())]))
            .op(StoreOp::expire("access:2", Duration::from_secs(60)))
            .op(StoreOp::set_fields("refresh:1", vec![]));

        assert_eq!(tx.keys(), vec!["refresh:1", "access:2", "access:1"]);
    }

    #[test]
    fn test_expire_uses_whole_seconds() {
        let op = StoreOp::expire("k", Duration::from_millis(2500));
        assert_eq!(
            op,
            StoreOp::Expire {
                key: "k".to_string(),
                seconds: 2
            }
        );
    }
}
