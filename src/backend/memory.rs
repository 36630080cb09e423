//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了进程内缓存存储，普通值、哈希和有序索引都放在有容量上限的Moka缓存中。

use super::{CacheStore, HashFields};
use crate::error::{FeedError, Result};
use async_trait::async_trait;
use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};
use moka::Expiry;
use std::collections::{BTreeMap, HashMap};
use std::future::ready;
use std::ops::Bound;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// 带过期时间的条目
trait Deadline {
    fn expire_at(&self) -> Option<Instant>;
}

#[derive(Clone)]
struct StoredValue {
    bytes: Vec<u8>,
    expire_at: Option<Instant>,
}

impl Deadline for StoredValue {
    fn expire_at(&self) -> Option<Instant> {
        self.expire_at
    }
}

#[derive(Clone)]
struct HashEntry {
    fields: HashFields,
    expire_at: Option<Instant>,
}

impl Deadline for HashEntry {
    fn expire_at(&self) -> Option<Instant> {
        self.expire_at
    }
}

/// 按条目自身记录的过期时间淘汰
///
/// 更新不会延长过期时间，只有整体覆盖写入新的过期时间时才会改变
struct DeadlineExpiry;

impl DeadlineExpiry {
    fn remaining<V: Deadline>(value: &V, now: Instant) -> Option<Duration> {
        value
            .expire_at()
            .map(|expire_time| expire_time.saturating_duration_since(now))
    }
}

impl<V: Deadline> Expiry<String, V> for DeadlineExpiry {
    fn expire_after_create(&self, _key: &String, value: &V, created_at: Instant) -> Option<Duration> {
        Self::remaining(value, created_at)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &V,
        updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Self::remaining(value, updated_at)
    }
}

/// 单个有序索引
///
/// 以 (分数, 插入序号) 排序，分数相同时按成员首次插入的先后排列
#[derive(Default)]
struct SortedIndex {
    ranks: BTreeMap<(i64, u64), String>,
    members: HashMap<String, (i64, u64)>,
    next_seq: u64,
}

impl SortedIndex {
    fn upsert(&mut self, member: String, score: i64) {
        match self.members.get(&member).copied() {
            Some((old_score, _)) if old_score == score => {}
            Some((old_score, seq)) => {
                self.ranks.remove(&(old_score, seq));
                self.ranks.insert((score, seq), member.clone());
                self.members.insert(member, (score, seq));
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.ranks.insert((score, seq), member.clone());
                self.members.insert(member, (score, seq));
            }
        }
    }

    fn trim(&mut self, max_len: usize) {
        while self.ranks.len() > max_len {
            match self.ranks.pop_first() {
                Some((_, member)) => {
                    self.members.remove(&member);
                }
                None => break,
            }
        }
    }

    fn len(&self) -> u64 {
        self.ranks.len() as u64
    }

    fn rev_range(&self, start: u64, stop: u64) -> Vec<String> {
        if stop < start {
            return Vec::new();
        }
        self.ranks
            .values()
            .rev()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect()
    }

    fn rev_rank(&self, member: &str) -> Option<u64> {
        let key = *self.members.get(member)?;
        let higher = self
            .ranks
            .range((Bound::Excluded(key), Bound::Unbounded))
            .count();
        Some(higher as u64)
    }
}

// 缺失字段按0处理，无法解析时返回None
fn parse_counter(fields: &HashFields, field: &str) -> Option<i64> {
    match fields.get(field) {
        Some(raw) => std::str::from_utf8(raw).ok()?.parse::<i64>().ok(),
        None => Some(0),
    }
}

/// 进程内缓存存储
///
/// 三类数据各自受 `max_capacity` 约束，超出后由Moka淘汰；带TTL的条目到期后由Moka清除。
/// 哈希的条件写入通过 `and_compute_with` 在单个键上串行执行；
/// 有序索引的复合操作在该索引的互斥锁内完成。被淘汰的索引等同于缓存未命中。
#[derive(Clone)]
pub struct MemoryStore {
    values: Cache<String, StoredValue>,
    hashes: Cache<String, HashEntry>,
    sorted: Cache<String, Arc<Mutex<SortedIndex>>>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("values", &self.values.entry_count())
            .field("hashes", &self.hashes.entry_count())
            .field("sorted", &self.sorted.entry_count())
            .finish()
    }
}

impl MemoryStore {
    /// 创建新的进程内存储
    ///
    /// # 参数
    ///
    /// * `max_capacity` - 普通值、哈希和有序索引各自的最大条目数
    pub fn new(max_capacity: u64) -> Self {
        Self {
            values: Cache::builder()
                .max_capacity(max_capacity)
                .expire_after(DeadlineExpiry)
                .build(),
            hashes: Cache::builder()
                .max_capacity(max_capacity)
                .expire_after(DeadlineExpiry)
                .build(),
            sorted: Cache::builder().max_capacity(max_capacity).build(),
        }
    }

    fn expire_at(ttl: Option<u64>) -> Option<Instant> {
        ttl.filter(|t| *t > 0)
            .map(|t| Instant::now() + Duration::from_secs(t))
    }

    async fn index(&self, key: &str) -> Arc<Mutex<SortedIndex>> {
        self.sorted
            .get_with_by_ref(key, async { Arc::new(Mutex::new(SortedIndex::default())) })
            .await
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    #[instrument(skip(self), level = "debug")]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.values.get(key).await.map(|value| value.bytes))
    }

    #[instrument(skip(self, value), level = "debug", fields(value_len = value.len()))]
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<u64>) -> Result<()> {
        self.values
            .insert(
                key.to_string(),
                StoredValue {
                    bytes: value,
                    expire_at: Self::expire_at(ttl),
                },
            )
            .await;
        Ok(())
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.get(key).await?);
        }
        Ok(out)
    }

    async fn set_many(&self, items: Vec<(String, Vec<u8>)>, ttl: Option<u64>) -> Result<()> {
        let expire_at = Self::expire_at(ttl);
        for (key, bytes) in items {
            self.values
                .insert(key, StoredValue { bytes, expire_at })
                .await;
        }
        Ok(())
    }

    #[instrument(skip(self, fields), level = "debug", fields(field_count = fields.len()))]
    async fn hash_put(
        &self,
        key: &str,
        fields: Vec<(String, Vec<u8>)>,
        ttl: Option<u64>,
    ) -> Result<()> {
        self.hashes
            .insert(
                key.to_string(),
                HashEntry {
                    fields: fields.into_iter().collect(),
                    expire_at: Self::expire_at(ttl),
                },
            )
            .await;
        Ok(())
    }

    async fn hash_get_all_many(&self, keys: &[String]) -> Result<Vec<Option<HashFields>>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.hashes.get(key).await.map(|entry| entry.fields));
        }
        Ok(out)
    }

    #[instrument(skip(self), level = "debug")]
    async fn hash_incr_if_exists(
        &self,
        key: &str,
        field: &str,
        delta: i64,
    ) -> Result<Option<i64>> {
        let outcome = self
            .hashes
            .entry_by_ref(key)
            .and_compute_with(|current| {
                let op = match current {
                    Some(entry) => {
                        let mut hash = entry.into_value();
                        match parse_counter(&hash.fields, field) {
                            Some(value) => {
                                let next = value.saturating_add(delta);
                                hash.fields
                                    .insert(field.to_string(), next.to_string().into_bytes());
                                Op::Put(hash)
                            }
                            None => Op::Nop,
                        }
                    }
                    None => Op::Nop,
                };
                ready(op)
            })
            .await;

        match outcome {
            CompResult::ReplacedWith(entry) => Ok(parse_counter(&entry.into_value().fields, field)),
            CompResult::Unchanged(_) => Err(FeedError::Store(format!(
                "hash field {}.{} is not an integer",
                key, field
            ))),
            _ => {
                debug!("MemoryStore hash_incr_if_exists: key={} absent", key);
                Ok(None)
            }
        }
    }

    async fn hash_set_if_exists(&self, key: &str, field: &str, value: Vec<u8>) -> Result<bool> {
        let outcome = self
            .hashes
            .entry_by_ref(key)
            .and_compute_with(|current| {
                let op = match current {
                    Some(entry) => {
                        let mut hash = entry.into_value();
                        hash.fields.insert(field.to_string(), value);
                        Op::Put(hash)
                    }
                    None => Op::Nop,
                };
                ready(op)
            })
            .await;
        Ok(matches!(outcome, CompResult::ReplacedWith(_)))
    }

    #[instrument(skip(self, members), level = "debug", fields(member_count = members.len()))]
    async fn sorted_add(
        &self,
        key: &str,
        members: Vec<(String, i64)>,
        max_len: Option<usize>,
    ) -> Result<u64> {
        let index = self.index(key).await;
        let mut index = index.lock().await;
        for (member, score) in members {
            index.upsert(member, score);
        }
        if let Some(max_len) = max_len {
            index.trim(max_len);
        }
        Ok(index.len())
    }

    async fn sorted_rev_range(&self, key: &str, start: u64, stop: u64) -> Result<Vec<String>> {
        match self.sorted.get(key).await {
            Some(index) => Ok(index.lock().await.rev_range(start, stop)),
            None => Ok(Vec::new()),
        }
    }

    async fn sorted_rev_rank(&self, key: &str, member: &str) -> Result<Option<u64>> {
        match self.sorted.get(key).await {
            Some(index) => Ok(index.lock().await.rev_rank(member)),
            None => Ok(None),
        }
    }

    async fn sorted_card(&self, key: &str) -> Result<u64> {
        match self.sorted.get(key).await {
            Some(index) => Ok(index.lock().await.len()),
            None => Ok(0),
        }
    }

    async fn sorted_score(&self, key: &str, member: &str) -> Result<Option<i64>> {
        match self.sorted.get(key).await {
            Some(index) => Ok(index
                .lock()
                .await
                .members
                .get(member)
                .map(|(score, _)| *score)),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.invalidate(key).await;
        self.hashes.invalidate(key).await;
        self.sorted.invalidate(key).await;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
