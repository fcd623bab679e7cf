//! 内存 TokenStore 实现

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tessera_errors::TokenResult;
use tessera_ports::{CommitOutcome, Guard, KeyTtl, StoreOp, TokenStore, Transaction};
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct Entry {
    fields: HashMap<String, String>,
    deadline: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= now)
    }
}

/// 每提交多少个事务全量清理一次过期键
const SWEEP_EVERY: u64 = 64;

/// 内存存储
///
/// 过期的键在下一次访问时惰性清除，行为上等同于不存在。
/// 从未再被访问的过期键由提交路径定期全量清理。
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    entries: Mutex<HashMap<String, Entry>>,
    commits: AtomicU64,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前未过期的键数量
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 清除全部已过期的键，返回清除数量
    pub fn purge_expired(&self) -> usize {
        Self::sweep(&mut self.entries.lock(), Instant::now())
    }

    fn sweep(entries: &mut HashMap<String, Entry>, now: Instant) -> usize {
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let purged = before - entries.len();
        if purged > 0 {
            debug!(purged = purged, "Expired entries swept");
        }
        purged
    }

    fn live<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
        now: Instant,
    ) -> Option<&'a mut Entry> {
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
            debug!(key = key, "Expired entry purged");
        }
        entries.get_mut(key)
    }

    fn check(entries: &mut HashMap<String, Entry>, guard: &Guard, now: Instant) -> bool {
        match guard {
            Guard::Absent { key } => Self::live(entries, key, now).is_none(),
            Guard::Present { key } => Self::live(entries, key, now).is_some(),
            Guard::FieldEquals { key, field, value } => Self::live(entries, key, now)
                .and_then(|entry| entry.fields.get(field))
                .is_some_and(|current| current == value),
        }
    }

    fn apply(entries: &mut HashMap<String, Entry>, op: &StoreOp, now: Instant) {
        match op {
            StoreOp::SetFields { key, fields } => {
                if Self::live(entries, key, now).is_none() {
                    entries.insert(key.clone(), Entry::default());
                }
                if let Some(entry) = entries.get_mut(key) {
                    entry.fields.extend(fields.iter().cloned());
                }
            }
            StoreOp::Expire { key, seconds } => {
                if *seconds == 0 {
                    entries.remove(key);
                } else if let Some(entry) = Self::live(entries, key, now) {
                    entry.deadline = Some(now + Duration::from_secs(*seconds));
                }
            }
            StoreOp::Delete { key } => {
                entries.remove(key);
            }
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn exists(&self, key: &str) -> TokenResult<bool> {
        let mut entries = self.entries.lock();
        Ok(Self::live(&mut entries, key, Instant::now()).is_some())
    }

    async fn get_field(&self, key: &str, field: &str) -> TokenResult<Option<String>> {
        let mut entries = self.entries.lock();
        Ok(Self::live(&mut entries, key, Instant::now())
            .and_then(|entry| entry.fields.get(field).cloned()))
    }

    async fn get_all(&self, key: &str) -> TokenResult<HashMap<String, String>> {
        let mut entries = self.entries.lock();
        Ok(Self::live(&mut entries, key, Instant::now())
            .map(|entry| entry.fields.clone())
            .unwrap_or_default())
    }

    async fn set_fields(&self, key: &str, fields: &[(String, String)]) -> TokenResult<()> {
        let mut entries = self.entries.lock();
        let op = StoreOp::set_fields(key, fields.to_vec());
        Self::apply(&mut entries, &op, Instant::now());
        Ok(())
    }

    async fn ttl(&self, key: &str) -> TokenResult<KeyTtl> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Ok(match Self::live(&mut entries, key, now) {
            None => KeyTtl::Missing,
            Some(Entry { deadline: None, .. }) => KeyTtl::Persistent,
            Some(Entry {
                deadline: Some(deadline),
                ..
            }) => {
                // 与 Redis 一致，按毫秒四舍五入到秒
                let remaining = deadline.saturating_duration_since(now).as_millis();
                KeyTtl::Expires(((remaining + 500) / 1000) as u64)
            }
        })
    }

    async fn delete(&self, keys: &[String]) -> TokenResult<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let mut deleted = 0;
        for key in keys {
            if Self::live(&mut entries, key, now).is_some() {
                entries.remove(key);
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn commit(&self, tx: &Transaction) -> TokenResult<CommitOutcome> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if (self.commits.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY == 0 {
            Self::sweep(&mut entries, now);
        }

        for (index, guard) in tx.guards().iter().enumerate() {
            if !Self::check(&mut entries, guard, now) {
                debug!(guard = index, key = guard.key(), "Transaction guard rejected");
                return Ok(CommitOutcome::Rejected { guard: index });
            }
        }
        for op in tx.ops() {
            Self::apply(&mut entries, op, now);
        }
        Ok(CommitOutcome::Committed)
    }

    async fn ping(&self) -> TokenResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_absent_key_reads_empty() {
        let store = MemoryTokenStore::new();
        assert!(!store.exists("missing").await.unwrap());
        assert!(store.get_all("missing").await.unwrap().is_empty());
        assert_eq!(store.get_field("missing", "f").await.unwrap(), None);
        assert_eq!(store.ttl("missing").await.unwrap(), KeyTtl::Missing);
        assert_eq!(store.delete(&["missing".to_string()]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_commit_applies_all_ops() {
        let store = MemoryTokenStore::new();
        let mut tx = Transaction::new();
        tx.guard(Guard::absent("k"));
        tx.op(StoreOp::set_fields("k", fields(&[("a", "1"), ("b", "2")])))
            .op(StoreOp::expire("k", Duration::from_secs(60)));

        assert_eq!(store.commit(&tx).await.unwrap(), CommitOutcome::Committed);
        assert_eq!(store.get_field("k", "b").await.unwrap().as_deref(), Some("2"));
        assert!(matches!(store.ttl("k").await.unwrap(), KeyTtl::Expires(59..=60)));
    }

    #[tokio::test]
    async fn test_rejected_guard_applies_nothing() {
        let store = MemoryTokenStore::new();
        store.set_fields("k", &fields(&[("count", "1")])).await.unwrap();

        let mut tx = Transaction::new();
        tx.guard(Guard::present("k"));
        tx.guard(Guard::field_equals("k", "count", "0"));
        tx.op(StoreOp::set_fields("k", fields(&[("count", "2")])))
            .op(StoreOp::delete("other"));

        assert_eq!(
            store.commit(&tx).await.unwrap(),
            CommitOutcome::Rejected { guard: 1 }
        );
        assert_eq!(store.get_field("k", "count").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.ttl("k").await.unwrap(), KeyTtl::Persistent);
    }

    #[tokio::test]
    async fn test_field_equals_on_missing_key_fails() {
        let store = MemoryTokenStore::new();
        let mut tx = Transaction::new();
        tx.guard(Guard::field_equals("nope", "f", ""));
        assert_eq!(
            store.commit(&tx).await.unwrap(),
            CommitOutcome::Rejected { guard: 0 }
        );
    }

    #[tokio::test]
    async fn test_expired_entry_behaves_as_absent() {
        let store = MemoryTokenStore::new();
        let mut tx = Transaction::new();
        tx.op(StoreOp::set_fields("k", fields(&[("a", "1")])))
            .op(StoreOp::expire("k", Duration::from_secs(1)));
        store.commit(&tx).await.unwrap();
        assert!(store.exists("k").await.unwrap());

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert!(!store.exists("k").await.unwrap());
        assert!(store.get_all("k").await.unwrap().is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_commits_sweep_unvisited_expired_entries() {
        let store = MemoryTokenStore::new();
        for i in 0..1000 {
            let key = format!("old:{}", i);
            let mut tx = Transaction::new();
            tx.op(StoreOp::set_fields(&key, fields(&[("a", "1")])))
                .op(StoreOp::expire(&key, Duration::from_secs(1)));
            store.commit(&tx).await.unwrap();
        }
        assert_eq!(store.entries.lock().len(), 1000);

        tokio::time::sleep(Duration::from_millis(1100)).await;

        for i in 0..SWEEP_EVERY {
            let key = format!("new:{}", i);
            let mut tx = Transaction::new();
            tx.op(StoreOp::set_fields(&key, fields(&[("a", "1")])))
                .op(StoreOp::expire(&key, Duration::from_secs(60)));
            store.commit(&tx).await.unwrap();
        }

        // 旧键从未被再次访问，也已被清理
        assert_eq!(store.entries.lock().len(), SWEEP_EVERY as usize);
        assert_eq!(store.len(), SWEEP_EVERY as usize);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryTokenStore::new();
        let mut tx = Transaction::new();
        tx.op(StoreOp::set_fields("short", fields(&[("a", "1")])))
            .op(StoreOp::expire("short", Duration::from_secs(1)))
            .op(StoreOp::set_fields("long", fields(&[("a", "1")])))
            .op(StoreOp::expire("long", Duration::from_secs(60)));
        store.commit(&tx).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.entries.lock().len(), 1);
        assert!(store.exists("long").await.unwrap());
    }

    #[tokio::test]
    async fn test_expire_zero_deletes() {
        let store = MemoryTokenStore::new();
        store.set_fields("k", &fields(&[("a", "1")])).await.unwrap();
        let mut tx = Transaction::new();
        tx.op(StoreOp::expire("k", Duration::ZERO));
        store.commit(&tx).await.unwrap();
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_counts_only_live_keys() {
        let store = MemoryTokenStore::new();
        store.set_fields("a", &fields(&[("x", "1")])).await.unwrap();
        let deleted = store
            .delete(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.len(), 0);
    }
}
