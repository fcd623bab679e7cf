//! 事务脚本
//!
//! Redis 以原子方式执行 Lua 脚本，因此守卫检查和全部写操作之间
//! 不会插入其他客户端的命令。事务以 JSON 形式作为 ARGV[1] 传入，
//! 键通过 KEYS 传入（下标从 1 开始）。
//!
//! 返回 0 表示已提交，返回 n 表示第 n 个守卫（从 1 开始）未通过。
//! 字段逐对写入，不受 Lua `unpack` 参数个数限制。

use serde::Serialize;
use tessera_errors::{TokenError, TokenResult};
use tessera_ports::{Guard, StoreOp, Transaction};

pub(crate) const COMMIT_SCRIPT: &str = r"
local program = cjson.decode(ARGV[1])
for i, g in ipairs(program.g) do
    local key = KEYS[g.k]
    local ok
    if g.t == 'absent' then
        ok = redis.call('EXISTS', key) == 0
    elseif g.t == 'present' then
        ok = redis.call('EXISTS', key) == 1
    else
        ok = redis.call('HGET', key, g.f) == g.v
    end
    if not ok then
        return i
    end
end
for _, o in ipairs(program.o) do
    local key = KEYS[o.k]
    if o.t == 'hset' then
        for j = 1, #o.f, 2 do
            redis.call('HSET', key, o.f[j], o.f[j + 1])
        end
    elseif o.t == 'expire' then
        redis.call('EXPIRE', key, o.s)
    else
        redis.call('DEL', key)
    end
end
return 0
";

#[derive(Debug, Serialize)]
#[serde(tag = "t", rename_all = "snake_case")]
enum WireGuard {
    Absent { k: usize },
    Present { k: usize },
    FieldEquals { k: usize, f: String, v: String },
}

#[derive(Debug, Serialize)]
#[serde(tag = "t", rename_all = "snake_case")]
enum WireOp {
    Hset { k: usize, f: Vec<String> },
    Expire { k: usize, s: u64 },
    Del { k: usize },
}

#[derive(Debug, Serialize)]
struct WireProgram {
    g: Vec<WireGuard>,
    o: Vec<WireOp>,
}

/// 编码后的事务：脚本的 KEYS 与 ARGV[1]
#[derive(Debug)]
pub(crate) struct EncodedTransaction {
    pub keys: Vec<String>,
    pub program: String,
}

pub(crate) fn encode(tx: &Transaction) -> TokenResult<EncodedTransaction> {
    let keys = tx.keys();
    let index = |key: &str| -> usize {
        // keys() 覆盖了事务中出现的全部键
        keys.iter().position(|k| k == key).map_or(0, |i| i + 1)
    };

    let guards = tx
        .guards()
        .iter()
        .map(|guard| match guard {
            Guard::Absent { key } => WireGuard::Absent { k: index(key) },
            Guard::Present { key } => WireGuard::Present { k: index(key) },
            Guard::FieldEquals { key, field, value } => WireGuard::FieldEquals {
                k: index(key),
                f: field.clone(),
                v: value.clone(),
            },
        })
        .collect();

    let ops = tx
        .ops()
        .iter()
        .map(|op| match op {
            StoreOp::SetFields { key, fields } => WireOp::Hset {
                k: index(key),
                f: fields
                    .iter()
                    .flat_map(|(field, value)| [field.clone(), value.clone()])
                    .collect(),
            },
            StoreOp::Expire { key, seconds } => WireOp::Expire {
                k: index(key),
                s: *seconds,
            },
            StoreOp::Delete { key } => WireOp::Del { k: index(key) },
        })
        .collect();

    let program = serde_json::to_string(&WireProgram { g: guards, o: ops })
        .map_err(|e| TokenError::encoding(format!("Failed to encode transaction: {}", e)))?;

    Ok(EncodedTransaction { keys, program })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_encode_uses_one_based_key_indices() {
        let mut tx = Transaction::new();
        tx.guard(Guard::present("refresh:r1"));
        tx.guard(Guard::field_equals("refresh:r1", "_use_count", "0"));
        tx.guard(Guard::absent("access:a2"));
        tx.op(StoreOp::delete("access:a1"))
            .op(StoreOp::set_fields(
                "access:a2",
                vec![("uid".to_string(), "7".to_string())],
            ))
            .op(StoreOp::expire("access:a2", Duration::from_secs(60)));

        let encoded = encode(&tx).unwrap();
        assert_eq!(encoded.keys, vec!["refresh:r1", "access:a2", "access:a1"]);

        let program: serde_json::Value = serde_json::from_str(&encoded.program).unwrap();
        assert_eq!(program["g"][0], serde_json::json!({"t": "present", "k": 1}));
        assert_eq!(
            program["g"][1],
            serde_json::json!({"t": "field_equals", "k": 1, "f": "_use_count", "v": "0"})
        );
        assert_eq!(program["g"][2], serde_json::json!({"t": "absent", "k": 2}));
        assert_eq!(program["o"][0], serde_json::json!({"t": "del", "k": 3}));
        assert_eq!(
            program["o"][1],
            serde_json::json!({"t": "hset", "k": 2, "f": ["uid", "7"]})
        );
        assert_eq!(
            program["o"][2],
            serde_json::json!({"t": "expire", "k": 2, "s": 60})
        );
    }

    #[test]
    fn test_encode_empty_transaction() {
        let encoded = encode(&Transaction::new()).unwrap();
        assert!(encoded.keys.is_empty());
        assert_eq!(encoded.program, r#"{"g":[],"o":[]}"#);
    }
}
