//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存回源所依赖的外部数据源接口。
//!
//! 帖子服务和用户目录是真实数据所在，缓存只从这里读取，从不写回。

use crate::error::Result;
use crate::model::{PostSnapshot, UserProfile};
use async_trait::async_trait;

/// 帖子数据源
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PostSource: Send + Sync {
    /// 按ID读取帖子
    ///
    /// # 返回值
    ///
    /// 帖子不存在时返回 `FeedError::NotFound`
    async fn get_post_by_id(&self, post_id: i64) -> Result<PostSnapshot>;

    /// 读取某作者最近发布的帖子，最新在前
    ///
    /// # 参数
    ///
    /// * `author_id` - 作者ID
    /// * `limit` - 最大返回数量
    async fn get_recent_posts_by_author(
        &self,
        author_id: i64,
        limit: usize,
    ) -> Result<Vec<PostSnapshot>>;
}

/// 用户目录
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// 读取全部用户（含关注关系）
    async fn fetch_all_users(&self) -> Result<Vec<UserProfile>>;

    /// 批量读取用户，不存在的ID被忽略
    async fn fetch_users_by_ids(&self, user_ids: Vec<i64>) -> Result<Vec<UserProfile>>;
}
