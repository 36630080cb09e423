//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 命令行进程没有帖子服务，回源请求一律失败。

use crate::error::{FeedError, Result};
use crate::model::PostSnapshot;
use crate::source::PostSource;
use async_trait::async_trait;

pub struct OfflineSource;

#[async_trait]
impl PostSource for OfflineSource {
    async fn get_post_by_id(&self, post_id: i64) -> Result<PostSnapshot> {
        Err(FeedError::Source(format!(
            "post {} is not cached and no post source is attached",
            post_id
        )))
    }

    async fn get_recent_posts_by_author(
        &self,
        _author_id: i64,
        _limit: usize,
    ) -> Result<Vec<PostSnapshot>> {
        Ok(Vec::new())
    }
}
