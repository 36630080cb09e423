//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存条目、数据源DTO以及热度消息的数据结构。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 评论快照
///
/// 按全部字段做值相等比较，用于评论列表去重
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentSnapshot {
    pub id: i64,
    pub author_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// 数据源返回的帖子完整表示，也是热度消息中的帖子格式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostSnapshot {
    pub id: i64,
    pub author_id: i64,
    pub content: String,
    pub likes: u64,
    pub views: u64,
    #[serde(default)]
    pub comments: Vec<CommentSnapshot>,
    pub published_at: DateTime<Utc>,
}

impl PostSnapshot {
    /// 发布时间的毫秒时间戳，作为Feed索引的分数
    pub fn score(&self) -> i64 {
        self.published_at.timestamp_millis()
    }
}

/// 帖子缓存条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostCacheEntry {
    pub id: i64,
    pub author_id: i64,
    pub content: String,
    pub likes: u64,
    pub views: u64,
    /// 最近评论，最新在前
    pub comments: Vec<CommentSnapshot>,
    pub published_at: DateTime<Utc>,
}

/// 作者缓存条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorCacheEntry {
    pub id: i64,
    pub username: String,
    pub email: String,
}

impl From<&UserProfile> for AuthorCacheEntry {
    fn from(user: &UserProfile) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
        }
    }
}

/// 用户目录返回的用户信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub follower_ids: Vec<i64>,
    #[serde(default)]
    pub followee_ids: Vec<i64>,
}

/// 热度消息：某个粉丝的一批预热帖子
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatBundle {
    /// 消息标识，重复投递时保持不变
    pub bundle_id: Uuid,
    pub follower_id: i64,
    /// 帖子列表，最新在前
    pub posts: Vec<PostSnapshot>,
}

impl HeatBundle {
    pub fn new(follower_id: i64, posts: Vec<PostSnapshot>) -> Self {
        Self {
            bundle_id: Uuid::new_v4(),
            follower_id,
            posts,
        }
    }
}

/// Feed 返回给展示层的帖子视图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostView {
    pub id: i64,
    pub author_id: i64,
    pub author: Option<AuthorCacheEntry>,
    pub content: String,
    pub likes: u64,
    pub views: u64,
    pub comments: Vec<CommentSnapshot>,
    pub published_at: DateTime<Utc>,
}

impl PostView {
    pub fn from_entry(entry: PostCacheEntry, author: Option<AuthorCacheEntry>) -> Self {
        Self {
            id: entry.id,
            author_id: entry.author_id,
            author,
            content: entry.content,
            likes: entry.likes,
            views: entry.views,
            comments: entry.comments,
            published_at: entry.published_at,
        }
    }
}
