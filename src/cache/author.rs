//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了作者信息缓存。

use crate::backend::CacheStore;
use crate::config::AuthorCacheConfig;
use crate::error::Result;
use crate::model::{AuthorCacheEntry, UserProfile};
use crate::serialization::{JsonSerializer, Serializer};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{instrument, warn};

/// 作者缓存
///
/// 由热度管道刷新，Feed读取时用于补全作者信息
pub struct AuthorCache {
    store: Arc<dyn CacheStore>,
    config: AuthorCacheConfig,
    serializer: JsonSerializer,
}

impl AuthorCache {
    pub fn new(store: Arc<dyn CacheStore>, config: AuthorCacheConfig) -> Self {
        Self {
            store,
            config,
            serializer: JsonSerializer::new(),
        }
    }

    fn key(&self, author_id: i64) -> String {
        format!("{}{}", self.config.key_prefix, author_id)
    }

    /// 写入单个用户的作者条目
    #[instrument(skip(self, user), level = "debug", fields(author_id = user.id))]
    pub async fn save(&self, user: &UserProfile) -> Result<()> {
        let entry = AuthorCacheEntry::from(user);
        let bytes = self.serializer.serialize(&entry)?;
        self.store
            .set(&self.key(entry.id), bytes, self.config.ttl_secs)
            .await
    }

    /// 批量写入作者条目
    pub async fn save_all(&self, users: &[UserProfile]) -> Result<()> {
        let mut items = Vec::with_capacity(users.len());
        for user in users {
            let entry = AuthorCacheEntry::from(user);
            items.push((self.key(entry.id), self.serializer.serialize(&entry)?));
        }
        self.store.set_many(items, self.config.ttl_secs).await
    }

    pub async fn get(&self, author_id: i64) -> Result<Option<AuthorCacheEntry>> {
        match self.store.get(&self.key(author_id)).await? {
            Some(bytes) => self.serializer.deserialize(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// 批量读取作者条目
    ///
    /// # 返回值
    ///
    /// 返回以作者ID为键的映射，未缓存或无法解析的作者不出现在结果中
    pub async fn get_many(&self, author_ids: &[i64]) -> Result<HashMap<i64, AuthorCacheEntry>> {
        let mut ids = author_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        let keys: Vec<String> = ids.iter().map(|id| self.key(*id)).collect();
        let values = self.store.get_many(&keys).await?;

        let mut authors = HashMap::with_capacity(ids.len());
        for (id, value) in ids.into_iter().zip(values) {
            let Some(bytes) = value else { continue };
            match self.serializer.deserialize::<AuthorCacheEntry>(&bytes) {
                Ok(entry) => {
                    authors.insert(id, entry);
                }
                Err(e) => warn!("Ignoring unreadable author {}: {}", id, e),
            }
        }
        Ok(authors)
    }
}
