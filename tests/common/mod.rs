//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了测试的通用工具函数、内存数据源和测试数据。

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use feedcache::backend::{CacheStore, HashFields, MemoryStore};
use feedcache::config::{Config, RedisConfig};
use feedcache::sync::HeatPublisher;
use feedcache::{
    CommentSnapshot, FeedError, HeatBundle, PostSnapshot, PostSource, RedisStore, Result,
    UserDirectory, UserProfile,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, Once};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

pub fn setup_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_span_events(FmtSpan::CLOSE)
            .with_env_filter(EnvFilter::new("debug"))
            .try_init()
            .ok();
    });
}

/// 测试用的基准时间
pub fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap() + Duration::minutes(minutes)
}

pub fn post(id: i64, author_id: i64, minutes: i64) -> PostSnapshot {
    PostSnapshot {
        id,
        author_id,
        content: format!("post {} by {}", id, author_id),
        likes: 0,
        views: 0,
        comments: Vec::new(),
        published_at: at(minutes),
    }
}

pub fn comment(id: i64, minutes: i64) -> CommentSnapshot {
    CommentSnapshot {
        id,
        author_id: 100 + id,
        content: format!("comment {}", id),
        created_at: at(minutes),
    }
}

pub fn user(id: i64, follower_ids: Vec<i64>, followee_ids: Vec<i64>) -> UserProfile {
    UserProfile {
        id,
        username: format!("user{}", id),
        email: format!("user{}@example.com", id),
        follower_ids,
        followee_ids,
    }
}

/// 小容量配置，便于触发裁剪和分页
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.feed.max_feed_size = 10;
    config.feed.page_size = 3;
    config.fanout.core_pool_size = 2;
    config.fanout.max_pool_size = 3;
    config.fanout.queue_capacity = 16;
    config.heat.retry_backoff_ms = 10;
    config.heat.max_retries = 2;
    config
}

pub fn memory_store() -> std::sync::Arc<dyn CacheStore> {
    std::sync::Arc::new(MemoryStore::new(10_000))
}

/// 内存中的帖子数据源
#[derive(Default)]
pub struct InMemoryPostSource {
    posts: Mutex<HashMap<i64, PostSnapshot>>,
    get_calls: AtomicUsize,
    recent_calls: AtomicUsize,
    delay_ms: u64,
}

impl InMemoryPostSource {
    pub fn new(posts: Vec<PostSnapshot>) -> Self {
        Self {
            posts: Mutex::new(posts.into_iter().map(|p| (p.id, p)).collect()),
            ..Self::default()
        }
    }

    /// 每次按ID读取都等待一段时间，用于放大并发窗口
    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn insert(&self, post: PostSnapshot) {
        self.posts.lock().unwrap().insert(post.id, post);
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn recent_calls(&self) -> usize {
        self.recent_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PostSource for InMemoryPostSource {
    async fn get_post_by_id(&self, post_id: i64) -> Result<PostSnapshot> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        self.posts
            .lock()
            .unwrap()
            .get(&post_id)
            .cloned()
            .ok_or_else(|| FeedError::post_not_found(post_id))
    }

    async fn get_recent_posts_by_author(
        &self,
        author_id: i64,
        limit: usize,
    ) -> Result<Vec<PostSnapshot>> {
        self.recent_calls.fetch_add(1, Ordering::SeqCst);
        let mut posts: Vec<PostSnapshot> = self
            .posts
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.author_id == author_id)
            .cloned()
            .collect();
        posts.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        posts.truncate(limit);
        Ok(posts)
    }
}

/// 内存中的用户目录
pub struct InMemoryDirectory {
    users: Vec<UserProfile>,
    all_calls: AtomicUsize,
    by_ids_calls: AtomicUsize,
}

impl InMemoryDirectory {
    pub fn new(users: Vec<UserProfile>) -> Self {
        Self {
            users,
            all_calls: AtomicUsize::new(0),
            by_ids_calls: AtomicUsize::new(0),
        }
    }

    pub fn all_calls(&self) -> usize {
        self.all_calls.load(Ordering::SeqCst)
    }

    pub fn by_ids_calls(&self) -> usize {
        self.by_ids_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn fetch_all_users(&self) -> Result<Vec<UserProfile>> {
        self.all_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.users.clone())
    }

    async fn fetch_users_by_ids(&self, user_ids: Vec<i64>) -> Result<Vec<UserProfile>> {
        self.by_ids_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .users
            .iter()
            .filter(|u| user_ids.contains(&u.id))
            .cloned()
            .collect())
    }
}

/// 记录所有发布消息的发布者
#[derive(Default)]
pub struct RecordingPublisher {
    bundles: Mutex<Vec<HeatBundle>>,
    fail_for: Vec<i64>,
}

impl RecordingPublisher {
    /// 对指定粉丝的消息发布失败
    pub fn failing_for(fail_for: Vec<i64>) -> Self {
        Self {
            bundles: Mutex::new(Vec::new()),
            fail_for,
        }
    }

    pub fn bundles(&self) -> Vec<HeatBundle> {
        self.bundles.lock().unwrap().clone()
    }
}

#[async_trait]
impl HeatPublisher for RecordingPublisher {
    async fn publish(&self, bundle: &HeatBundle) -> Result<()> {
        if self.fail_for.contains(&bundle.follower_id) {
            return Err(FeedError::Channel("broker unavailable".to_string()));
        }
        self.bundles.lock().unwrap().push(bundle.clone());
        Ok(())
    }
}

/// 有序索引写入前若干次失败的存储
pub struct FlakyStore {
    inner: MemoryStore,
    failures_left: AtomicUsize,
    sorted_add_calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: MemoryStore::new(10_000),
            failures_left: AtomicUsize::new(failures),
            sorted_add_calls: AtomicUsize::new(0),
        }
    }

    pub fn sorted_add_calls(&self) -> usize {
        self.sorted_add_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<u64>) -> Result<()> {
        self.inner.set(key, value, ttl).await
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        self.inner.get_many(keys).await
    }

    async fn set_many(&self, items: Vec<(String, Vec<u8>)>, ttl: Option<u64>) -> Result<()> {
        self.inner.set_many(items, ttl).await
    }

    async fn hash_put(
        &self,
        key: &str,
        fields: Vec<(String, Vec<u8>)>,
        ttl: Option<u64>,
    ) -> Result<()> {
        self.inner.hash_put(key, fields, ttl).await
    }

    async fn hash_get_all_many(&self, keys: &[String]) -> Result<Vec<Option<HashFields>>> {
        self.inner.hash_get_all_many(keys).await
    }

    async fn hash_incr_if_exists(
        &self,
        key: &str,
        field: &str,
        delta: i64,
    ) -> Result<Option<i64>> {
        self.inner.hash_incr_if_exists(key, field, delta).await
    }

    async fn hash_set_if_exists(&self, key: &str, field: &str, value: Vec<u8>) -> Result<bool> {
        self.inner.hash_set_if_exists(key, field, value).await
    }

    async fn sorted_add(
        &self,
        key: &str,
        members: Vec<(String, i64)>,
        max_len: Option<usize>,
    ) -> Result<u64> {
        self.sorted_add_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(FeedError::Store("injected failure".to_string()));
        }
        self.inner.sorted_add(key, members, max_len).await
    }

    async fn sorted_rev_range(&self, key: &str, start: u64, stop: u64) -> Result<Vec<String>> {
        self.inner.sorted_rev_range(key, start, stop).await
    }

    async fn sorted_rev_rank(&self, key: &str, member: &str) -> Result<Option<u64>> {
        self.inner.sorted_rev_rank(key, member).await
    }

    async fn sorted_card(&self, key: &str) -> Result<u64> {
        self.inner.sorted_card(key).await
    }

    async fn sorted_score(&self, key: &str, member: &str) -> Result<Option<i64>> {
        self.inner.sorted_score(key, member).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}

pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

pub fn redis_config() -> RedisConfig {
    RedisConfig {
        connection_string: redis_url().into(),
        connection_timeout_ms: 1000,
        ..RedisConfig::default()
    }
}

/// 连接本地Redis，不可用时返回None
pub async fn connect_redis() -> Option<RedisStore> {
    match RedisStore::connect(&redis_config()).await {
        Ok(store) => match store.ping().await {
            Ok(()) => Some(store),
            Err(_) => None,
        },
        Err(_) => None,
    }
}

/// 生成测试专用的唯一前缀，避免测试之间互相干扰
pub fn unique_prefix(name: &str) -> String {
    format!("test:{}:{}:", name, uuid::Uuid::new_v4().simple())
}
