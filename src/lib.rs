//! feedcache - 个性化Feed缓存引擎
//!
//! 基于写扩散（fan-out-on-write）为每个用户维护按时间排序、容量受限的Feed索引，
//! 缓存帖子的浏览数、点赞数和最近评论，并通过热度管道为活跃内容预热缓存。
//! 存储可以是进程内的Moka缓存，也可以是Redis单机或集群。

#![doc(html_root_url = "https://docs.rs/feedcache/0.1.0")]

pub use serde;
pub use serde::{Deserialize, Serialize};
pub use serde_json;
pub use tokio;

pub mod backend;
pub mod bounded_map;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod model;
pub mod serialization;
pub mod source;
pub mod sync;
pub mod telemetry;

// Re-export commonly used items
pub use backend::{CacheStore, MemoryStore, RedisStore};
pub use bounded_map::{BoundedMap, EvictionOrder};
pub use config::Config;
pub use error::{FeedError, Result};
pub use manager::{FeedManager, HeatSources};
pub use model::{
    AuthorCacheEntry, CommentSnapshot, HeatBundle, PostCacheEntry, PostSnapshot, PostView,
    UserProfile,
};
pub use source::{PostSource, UserDirectory};

/// feedcache 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
