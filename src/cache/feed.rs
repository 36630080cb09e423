//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了每个用户的Feed索引：按发布时间排序、容量受限的帖子ID集合。

use super::post::PostCache;
use crate::backend::CacheStore;
use crate::config::FeedConfig;
use crate::error::Result;
use crate::metrics::GLOBAL_METRICS;
use crate::model::{HeatBundle, PostCacheEntry};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Feed索引
///
/// 分数为发布时间的毫秒时间戳；每次写入后基数都不超过 `max_feed_size`
pub struct FeedIndex {
    store: Arc<dyn CacheStore>,
    posts: Arc<PostCache>,
    config: FeedConfig,
}

impl FeedIndex {
    pub fn new(store: Arc<dyn CacheStore>, posts: Arc<PostCache>, config: FeedConfig) -> Self {
        Self {
            store,
            posts,
            config,
        }
    }

    pub fn page_size(&self) -> usize {
        self.config.page_size
    }

    pub fn max_feed_size(&self) -> usize {
        self.config.max_feed_size
    }

    fn key(&self, user_id: i64) -> String {
        format!("{}{}", self.config.key_prefix, user_id)
    }

    /// 把帖子写入某个粉丝的Feed
    ///
    /// 已存在的帖子只更新分数；超出容量时在同一原子步骤中删除分数最低的条目
    ///
    /// # 参数
    ///
    /// * `follower_id` - 粉丝ID
    /// * `post_id` - 帖子ID
    /// * `published_at` - 发布时间
    ///
    /// # 返回值
    ///
    /// 返回写入后的Feed长度
    #[instrument(skip(self), level = "debug")]
    pub async fn add_entry(
        &self,
        follower_id: i64,
        post_id: i64,
        published_at: DateTime<Utc>,
    ) -> Result<u64> {
        let len = self
            .store
            .sorted_add(
                &self.key(follower_id),
                vec![(post_id.to_string(), published_at.timestamp_millis())],
                Some(self.config.max_feed_size),
            )
            .await?;
        GLOBAL_METRICS.record_request("feed_index", "add", "ok");
        Ok(len)
    }

    /// 把热度消息中的全部帖子写入粉丝Feed，随后裁剪到 `max_feed_size`
    #[instrument(skip(self, bundle), level = "debug", fields(follower_id = bundle.follower_id, posts = bundle.posts.len()))]
    pub async fn bulk_insert(&self, bundle: &HeatBundle) -> Result<u64> {
        let members = bundle
            .posts
            .iter()
            .map(|post| (post.id.to_string(), post.score()))
            .collect();
        let len = self
            .store
            .sorted_add(
                &self.key(bundle.follower_id),
                members,
                Some(self.config.max_feed_size),
            )
            .await?;
        GLOBAL_METRICS.record_request("feed_index", "bulk_insert", "ok");
        Ok(len)
    }

    /// 读取一页帖子ID，按发布时间降序
    ///
    /// # 参数
    ///
    /// * `user_id` - 用户ID
    /// * `cursor` - 上一页最后一个帖子ID；不在索引中时退回第一页
    #[instrument(skip(self), level = "debug")]
    pub async fn get_feed_ids(&self, user_id: i64, cursor: Option<i64>) -> Result<Vec<i64>> {
        let key = self.key(user_id);
        let start = match cursor {
            Some(cursor) => match self.store.sorted_rev_rank(&key, &cursor.to_string()).await? {
                Some(rank) => rank + 1,
                None => {
                    debug!("cursor {} not in feed of user {}, serving first page", cursor, user_id);
                    0
                }
            },
            None => 0,
        };
        let stop = start + self.config.page_size.max(1) as u64 - 1;
        let members = self.store.sorted_rev_range(&key, start, stop).await?;

        Ok(members
            .into_iter()
            .filter_map(|member| match member.parse::<i64>() {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!("Skipping malformed feed member {:?} for user {}", member, user_id);
                    None
                }
            })
            .collect())
    }

    /// 读取一页帖子，缓存中不存在的帖子被丢弃
    pub async fn get_feed(&self, user_id: i64, cursor: Option<i64>) -> Result<Vec<PostCacheEntry>> {
        let ids = self.get_feed_ids(user_id, cursor).await?;
        let entries = self.posts.get_by_ids(&ids).await?;
        let result = if entries.len() == ids.len() { "hit" } else { "partial" };
        GLOBAL_METRICS.record_request("feed_index", "get_feed", result);
        Ok(entries)
    }

    /// Feed长度
    pub async fn feed_len(&self, user_id: i64) -> Result<u64> {
        self.store.sorted_card(&self.key(user_id)).await
    }

    /// 帖子在Feed中的分数
    pub async fn score_of(&self, user_id: i64, post_id: i64) -> Result<Option<i64>> {
        self.store
            .sorted_score(&self.key(user_id), &post_id.to_string())
            .await
    }
}
