//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了帖子互动缓存：浏览数、点赞数和最近评论。
//!
//! 每个帖子存为一个哈希：`views`、`likes` 两个十进制计数字段加上 `body`（其余字段的JSON）。
//! 计数只通过原子自增修改，评论改写只触碰 `body`，两者互不覆盖。

use crate::backend::{CacheStore, HashFields};
use crate::config::PostCacheConfig;
use crate::error::{FeedError, Result};
use crate::metrics::GLOBAL_METRICS;
use crate::model::{CommentSnapshot, PostCacheEntry, PostSnapshot};
use crate::serialization::{JsonSerializer, Serializer};
use crate::source::PostSource;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

const FIELD_VIEWS: &str = "views";
const FIELD_LIKES: &str = "likes";
const FIELD_BODY: &str = "body";

#[derive(Serialize, Deserialize)]
struct PostBody {
    id: i64,
    author_id: i64,
    content: String,
    comments: Vec<CommentSnapshot>,
    published_at: DateTime<Utc>,
}

/// 帖子互动缓存
///
/// 未命中时从帖子数据源回源加载（hydrate-on-miss），
/// 同一帖子的回源和评论写入通过分段锁串行化
pub struct PostCache {
    store: Arc<dyn CacheStore>,
    source: Arc<dyn PostSource>,
    config: PostCacheConfig,
    serializer: JsonSerializer,
    locks: Vec<Mutex<()>>,
}

impl PostCache {
    /// 创建帖子缓存
    ///
    /// # 参数
    ///
    /// * `store` - 缓存存储
    /// * `source` - 帖子数据源
    /// * `config` - 帖子缓存配置
    pub fn new(
        store: Arc<dyn CacheStore>,
        source: Arc<dyn PostSource>,
        config: PostCacheConfig,
    ) -> Self {
        let stripes = config.lock_stripes.max(1);
        Self {
            store,
            source,
            serializer: JsonSerializer::new(),
            locks: (0..stripes).map(|_| Mutex::new(())).collect(),
            config,
        }
    }

    pub fn comment_limit(&self) -> usize {
        self.config.comment_limit
    }

    fn key(&self, post_id: i64) -> String {
        format!("{}{}", self.config.key_prefix, post_id)
    }

    fn lock_for(&self, post_id: i64) -> &Mutex<()> {
        let idx = post_id.rem_euclid(self.locks.len() as i64) as usize;
        &self.locks[idx]
    }

    /// 浏览数加一
    ///
    /// 帖子未缓存时回源加载，触发加载的这次自增不再叠加到新条目上
    #[instrument(skip(self), level = "debug")]
    pub async fn increment_views(&self, post_id: i64) -> Result<()> {
        self.increment(post_id, FIELD_VIEWS).await
    }

    /// 点赞数加一，语义同 [`PostCache::increment_views`]
    #[instrument(skip(self), level = "debug")]
    pub async fn increment_likes(&self, post_id: i64) -> Result<()> {
        self.increment(post_id, FIELD_LIKES).await
    }

    async fn increment(&self, post_id: i64, field: &'static str) -> Result<()> {
        let key = self.key(post_id);
        if let Some(value) = self.store.hash_incr_if_exists(&key, field, 1).await? {
            debug!("post {} {} -> {}", post_id, field, value);
            GLOBAL_METRICS.record_request("post_cache", field, "hit");
            return Ok(());
        }

        let _guard = self.lock_for(post_id).lock().await;
        // 等锁期间可能已被其他调用者加载
        if self.store.hash_incr_if_exists(&key, field, 1).await?.is_some() {
            GLOBAL_METRICS.record_request("post_cache", field, "hit");
            return Ok(());
        }
        GLOBAL_METRICS.record_request("post_cache", field, "miss");
        self.hydrate(post_id).await?;
        Ok(())
    }

    /// 添加评论
    ///
    /// 已存在相同评论时不做任何修改；列表已满时先淘汰最旧的一条，再把新评论放到最前面
    ///
    /// # 参数
    ///
    /// * `post_id` - 帖子ID
    /// * `comment` - 新评论
    #[instrument(skip(self, comment), level = "debug", fields(comment_id = comment.id))]
    pub async fn add_comment(&self, post_id: i64, comment: CommentSnapshot) -> Result<()> {
        let _guard = self.lock_for(post_id).lock().await;
        let entry = match self.get(post_id).await? {
            Some(entry) => entry,
            None => {
                GLOBAL_METRICS.record_request("post_cache", "comment", "miss");
                self.hydrate(post_id).await?
            }
        };

        if entry.comments.contains(&comment) {
            debug!("comment {} already cached for post {}", comment.id, post_id);
            return Ok(());
        }

        let mut entry = entry;
        let limit = self.config.comment_limit.max(1);
        if entry.comments.len() >= limit {
            entry.comments.truncate(limit - 1);
        }
        entry.comments.insert(0, comment);

        let body = self.serializer.serialize(&PostBody {
            id: entry.id,
            author_id: entry.author_id,
            content: entry.content.clone(),
            comments: entry.comments.clone(),
            published_at: entry.published_at,
        })?;
        let key = self.key(post_id);
        if !self.store.hash_set_if_exists(&key, FIELD_BODY, body).await? {
            // 读取之后条目已过期，整体写回
            self.store
                .hash_put(&key, self.encode(&entry)?, self.config.ttl_secs)
                .await?;
        }
        GLOBAL_METRICS.record_request("post_cache", "comment", "ok");
        Ok(())
    }

    /// 读取单个帖子缓存，未命中返回None
    pub async fn get(&self, post_id: i64) -> Result<Option<PostCacheEntry>> {
        let key = self.key(post_id);
        let mut results = self.store.hash_get_all_many(&[key]).await?;
        match results.pop().flatten() {
            Some(fields) => self.decode(&fields).map(Some),
            None => Ok(None),
        }
    }

    /// 按请求顺序批量读取帖子缓存
    ///
    /// 未缓存或无法解析的帖子被忽略
    #[instrument(skip(self, post_ids), level = "debug", fields(count = post_ids.len()))]
    pub async fn get_by_ids(&self, post_ids: &[i64]) -> Result<Vec<PostCacheEntry>> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = post_ids.iter().map(|id| self.key(*id)).collect();
        let results = self.store.hash_get_all_many(&keys).await?;

        let mut entries = Vec::with_capacity(results.len());
        for (post_id, fields) in post_ids.iter().zip(results) {
            match fields {
                Some(fields) => match self.decode(&fields) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => warn!("Dropping unreadable post {} from cache read: {}", post_id, e),
                },
                None => debug!("post {} not cached", post_id),
            }
        }
        Ok(entries)
    }

    /// 以规范快照整体覆盖帖子缓存
    #[instrument(skip(self, snapshot), level = "debug", fields(post_id = snapshot.id))]
    pub async fn save(&self, snapshot: &PostSnapshot) -> Result<()> {
        let entry = self.normalize(snapshot);
        self.store
            .hash_put(&self.key(entry.id), self.encode(&entry)?, self.config.ttl_secs)
            .await
    }

    /// 并发保存多个快照
    pub async fn save_all(&self, snapshots: &[PostSnapshot]) -> Result<()> {
        try_join_all(snapshots.iter().map(|snapshot| self.save(snapshot))).await?;
        Ok(())
    }

    async fn hydrate(&self, post_id: i64) -> Result<PostCacheEntry> {
        let snapshot = match self.source.get_post_by_id(post_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                if e.is_not_found() {
                    debug!("post {} missing from source", post_id);
                }
                return Err(e);
            }
        };
        let entry = self.normalize(&snapshot);
        self.store
            .hash_put(&self.key(post_id), self.encode(&entry)?, self.config.ttl_secs)
            .await?;
        debug!("hydrated post {}", post_id);
        Ok(entry)
    }

    fn normalize(&self, snapshot: &PostSnapshot) -> PostCacheEntry {
        let mut comments = snapshot.comments.clone();
        comments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let mut unique: Vec<CommentSnapshot> = Vec::with_capacity(comments.len());
        for comment in comments {
            if !unique.contains(&comment) {
                unique.push(comment);
            }
        }
        unique.truncate(self.config.comment_limit.max(1));

        PostCacheEntry {
            id: snapshot.id,
            author_id: snapshot.author_id,
            content: snapshot.content.clone(),
            likes: snapshot.likes,
            views: snapshot.views,
            comments: unique,
            published_at: snapshot.published_at,
        }
    }

    fn encode(&self, entry: &PostCacheEntry) -> Result<Vec<(String, Vec<u8>)>> {
        let body = self.serializer.serialize(&PostBody {
            id: entry.id,
            author_id: entry.author_id,
            content: entry.content.clone(),
            comments: entry.comments.clone(),
            published_at: entry.published_at,
        })?;
        Ok(vec![
            (FIELD_VIEWS.to_string(), entry.views.to_string().into_bytes()),
            (FIELD_LIKES.to_string(), entry.likes.to_string().into_bytes()),
            (FIELD_BODY.to_string(), body),
        ])
    }

    fn decode(&self, fields: &HashFields) -> Result<PostCacheEntry> {
        let body: PostBody = self
            .serializer
            .deserialize_field(FIELD_BODY, fields.get(FIELD_BODY).map(Vec::as_slice))?;
        Ok(PostCacheEntry {
            id: body.id,
            author_id: body.author_id,
            content: body.content,
            likes: parse_counter(fields.get(FIELD_LIKES))?,
            views: parse_counter(fields.get(FIELD_VIEWS))?,
            comments: body.comments,
            published_at: body.published_at,
        })
    }
}

fn parse_counter(raw: Option<&Vec<u8>>) -> Result<u64> {
    let Some(raw) = raw else {
        return Ok(0);
    };
    let text = std::str::from_utf8(raw)
        .map_err(|e| FeedError::Serialization(format!("counter is not utf-8: {}", e)))?;
    let value: i64 = text
        .trim()
        .parse()
        .map_err(|e| FeedError::Serialization(format!("invalid counter {:?}: {}", text, e)))?;
    Ok(value.max(0) as u64)
}
