//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存存储接口，以及进程内和Redis两种存储实现。

pub mod memory;
pub mod redis_store;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// 哈希字段集合
pub type HashFields = HashMap<String, Vec<u8>>;

/// 缓存存储接口
///
/// 帖子、作者和Feed索引都建立在这组基于键的操作之上。
/// 复合操作（存在判断 + 自增、写入 + 裁剪）必须在存储端作为单个原子步骤执行。
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// 读取普通值
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// 写入普通值
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<u64>) -> Result<()>;

    /// 批量读取普通值，结果与键一一对应
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>>;

    /// 批量写入普通值
    async fn set_many(&self, items: Vec<(String, Vec<u8>)>, ttl: Option<u64>) -> Result<()>;

    /// 以给定字段整体覆盖哈希
    async fn hash_put(&self, key: &str, fields: Vec<(String, Vec<u8>)>, ttl: Option<u64>)
        -> Result<()>;

    /// 批量读取哈希的全部字段，不存在的键返回None
    async fn hash_get_all_many(&self, keys: &[String]) -> Result<Vec<Option<HashFields>>>;

    /// 键存在时原子地对整数字段加上 `delta`
    ///
    /// # 返回值
    ///
    /// 返回自增后的值，键不存在时返回None且不创建键
    async fn hash_incr_if_exists(&self, key: &str, field: &str, delta: i64)
        -> Result<Option<i64>>;

    /// 键存在时写入单个字段
    ///
    /// # 返回值
    ///
    /// 返回是否写入
    async fn hash_set_if_exists(&self, key: &str, field: &str, value: Vec<u8>) -> Result<bool>;

    /// 向有序索引添加或更新成员
    ///
    /// `max_len` 不为None时，在同一原子步骤内删除分数最低的成员，直到基数恰好为 `max_len`
    ///
    /// # 返回值
    ///
    /// 返回操作后的基数
    async fn sorted_add(
        &self,
        key: &str,
        members: Vec<(String, i64)>,
        max_len: Option<usize>,
    ) -> Result<u64>;

    /// 按分数降序读取排名区间 [start, stop]（包含两端）
    async fn sorted_rev_range(&self, key: &str, start: u64, stop: u64) -> Result<Vec<String>>;

    /// 成员在降序中的排名，从0开始
    async fn sorted_rev_rank(&self, key: &str, member: &str) -> Result<Option<u64>>;

    /// 有序索引基数
    async fn sorted_card(&self, key: &str) -> Result<u64>;

    /// 成员分数
    async fn sorted_score(&self, key: &str, member: &str) -> Result<Option<i64>>;

    /// 删除键
    async fn delete(&self, key: &str) -> Result<()>;

    /// 检查存储是否可用
    async fn ping(&self) -> Result<()>;
}

/// 根据配置创建存储
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn CacheStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new(config.memory.max_capacity))),
        StoreBackend::Redis => Ok(Arc::new(RedisStore::connect(&config.redis).await?)),
    }
}
