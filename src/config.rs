//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了Feed缓存系统的配置结构和解析逻辑。

use crate::error::{FeedError, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;

pub const CONFIG_VERSION: u32 = 1;

/// 顶层配置
///
/// 构造时一次性传入各组件，运行期间不可变
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub config_version: Option<u32>,
    pub feed: FeedConfig,
    pub post_cache: PostCacheConfig,
    pub author_cache: AuthorCacheConfig,
    pub fanout: FanoutConfig,
    pub heat: HeatConfig,
    pub store: StoreConfig,
}

/// Feed索引配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct FeedConfig {
    /// 每个用户Feed索引的最大条目数
    pub max_feed_size: usize,
    /// 每页返回的帖子数
    pub page_size: usize,
    /// 索引键前缀
    pub key_prefix: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            max_feed_size: 500,
            page_size: 20,
            key_prefix: "feed:".to_string(),
        }
    }
}

/// 帖子互动缓存配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct PostCacheConfig {
    /// 每个帖子缓存的最近评论数
    pub comment_limit: usize,
    /// 缓存键前缀
    pub key_prefix: String,
    /// 帖子缓存过期时间（秒），None 表示由存储自行管理
    pub ttl_secs: Option<u64>,
    /// 评论写入锁分段数
    pub lock_stripes: usize,
}

impl Default for PostCacheConfig {
    fn default() -> Self {
        Self {
            comment_limit: 3,
            key_prefix: "post:".to_string(),
            ttl_secs: None,
            lock_stripes: 64,
        }
    }
}

/// 作者缓存配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct AuthorCacheConfig {
    pub key_prefix: String,
    pub ttl_secs: Option<u64>,
}

impl Default for AuthorCacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: "author:".to_string(),
            ttl_secs: None,
        }
    }
}

/// 扇出线程池配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct FanoutConfig {
    /// 常驻工作者数量
    pub core_pool_size: usize,
    /// 最大并发任务数（常驻 + 溢出）
    pub max_pool_size: usize,
    /// 等待队列容量
    pub queue_capacity: usize,
    /// 单个扇出任务内并发写入的粉丝数
    pub follower_concurrency: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            core_pool_size: 4,
            max_pool_size: 8,
            queue_capacity: 1000,
            follower_concurrency: 16,
        }
    }
}

/// 热度管道配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct HeatConfig {
    /// 每个作者参与预热的最近帖子数
    pub max_posts_in_heat_feed: usize,
    /// 消费失败后的重试次数
    pub max_retries: u32,
    /// 重试间隔（毫秒）
    pub retry_backoff_ms: u64,
    /// 最近已处理消息窗口大小，0 表示禁用
    pub dedupe_window: usize,
    /// 拉取作者帖子时的并发度
    pub source_concurrency: usize,
    /// 定时预热间隔（秒），None 表示只支持手动触发
    pub refresh_interval_secs: Option<u64>,
    pub channel: ChannelConfig,
}

impl Default for HeatConfig {
    fn default() -> Self {
        Self {
            max_posts_in_heat_feed: 500,
            max_retries: 5,
            retry_backoff_ms: 3000,
            dedupe_window: 1024,
            source_concurrency: 8,
            refresh_interval_secs: None,
            channel: ChannelConfig::default(),
        }
    }
}

/// 热度事件通道配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ChannelConfig {
    /// 主题（Redis Stream 键）
    pub topic: String,
    /// 消费者组
    pub group: String,
    /// 消费者名称
    pub consumer: String,
    /// Stream 近似最大长度
    pub max_len: usize,
    /// 阻塞读取超时（毫秒）
    pub block_ms: usize,
    /// 每次读取的最大消息数
    pub batch_size: usize,
    /// 内存通道容量
    pub memory_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            topic: "heat".to_string(),
            group: "feedcache".to_string(),
            consumer: "feedcache-1".to_string(),
            max_len: 100_000,
            block_ms: 5000,
            batch_size: 32,
            memory_capacity: 1024,
        }
    }
}

/// 存储后端类型
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// 进程内存储
    #[default]
    Memory,
    /// Redis存储
    Redis,
}

/// 存储配置
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub memory: MemoryStoreConfig,
    pub redis: RedisConfig,
}

/// 进程内存储配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct MemoryStoreConfig {
    /// 普通值、哈希和有序索引各自的最大条目数
    pub max_capacity: u64,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_capacity: 100_000,
        }
    }
}

/// Redis配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct RedisConfig {
    pub mode: RedisMode,
    /// 连接字符串
    pub connection_string: SecretString,
    /// 集群节点列表
    pub cluster_nodes: Vec<String>,
    /// 连接超时时间（毫秒）
    pub connection_timeout_ms: u64,
    /// 命令执行超时时间（毫秒）
    pub command_timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            mode: RedisMode::Standalone,
            connection_string: SecretString::new("redis://127.0.0.1:6379".to_string().into()),
            cluster_nodes: Vec::new(),
            connection_timeout_ms: 5000,
            command_timeout_ms: 3000,
        }
    }
}

/// Redis模式枚举
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RedisMode {
    /// 单机模式
    #[default]
    Standalone,
    /// 集群模式
    Cluster,
}

impl Config {
    /// 从TOML字符串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| FeedError::Configuration(e.to_string()))?;
        config.validate().map_err(FeedError::Configuration)?;
        Ok(config)
    }

    /// 从TOML文件加载配置
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            FeedError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// 验证配置
    ///
    /// 检查各项数值是否在合理范围内
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(version) = self.config_version {
            if version > CONFIG_VERSION {
                return Err(format!(
                    "Configuration version {} is not supported. Current version is {}.",
                    version, CONFIG_VERSION
                ));
            }
        }

        if self.feed.max_feed_size == 0 {
            return Err("feed.max_feed_size cannot be zero".to_string());
        }
        if self.feed.page_size == 0 {
            return Err("feed.page_size cannot be zero".to_string());
        }
        if self.feed.page_size > self.feed.max_feed_size {
            return Err(format!(
                "feed.page_size ({}) must be <= feed.max_feed_size ({})",
                self.feed.page_size, self.feed.max_feed_size
            ));
        }

        if self.post_cache.comment_limit == 0 {
            return Err("post_cache.comment_limit cannot be zero".to_string());
        }
        if self.post_cache.lock_stripes == 0 {
            return Err("post_cache.lock_stripes cannot be zero".to_string());
        }
        if self.post_cache.ttl_secs == Some(0) || self.author_cache.ttl_secs == Some(0) {
            return Err("cache ttl_secs cannot be zero".to_string());
        }
        if self.feed.key_prefix == self.post_cache.key_prefix
            || self.post_cache.key_prefix == self.author_cache.key_prefix
            || self.feed.key_prefix == self.author_cache.key_prefix
        {
            return Err("feed, post and author key prefixes must differ".to_string());
        }

        let fanout = &self.fanout;
        if fanout.core_pool_size == 0 {
            return Err("fanout.core_pool_size cannot be zero".to_string());
        }
        if fanout.max_pool_size < fanout.core_pool_size {
            return Err(format!(
                "fanout.max_pool_size ({}) must be >= core_pool_size ({})",
                fanout.max_pool_size, fanout.core_pool_size
            ));
        }
        if fanout.queue_capacity == 0 {
            return Err("fanout.queue_capacity cannot be zero".to_string());
        }
        if fanout.follower_concurrency == 0 {
            return Err("fanout.follower_concurrency cannot be zero".to_string());
        }

        let heat = &self.heat;
        if heat.max_posts_in_heat_feed == 0 {
            return Err("heat.max_posts_in_heat_feed cannot be zero".to_string());
        }
        if heat.retry_backoff_ms > 600_000 {
            return Err("heat.retry_backoff_ms cannot exceed 600000 ms".to_string());
        }
        if heat.source_concurrency == 0 {
            return Err("heat.source_concurrency cannot be zero".to_string());
        }
        if heat.refresh_interval_secs == Some(0) {
            return Err("heat.refresh_interval_secs cannot be zero".to_string());
        }
        if heat.channel.topic.is_empty() || heat.channel.group.is_empty() {
            return Err("heat.channel topic and group cannot be empty".to_string());
        }
        if heat.channel.batch_size == 0 || heat.channel.memory_capacity == 0 {
            return Err("heat.channel batch_size and memory_capacity cannot be zero".to_string());
        }

        if self.store.memory.max_capacity == 0 {
            return Err("store.memory.max_capacity cannot be zero".to_string());
        }
        if self.store.backend == StoreBackend::Redis {
            let redis = &self.store.redis;
            if !(100..=30000).contains(&redis.connection_timeout_ms) {
                return Err(
                    "store.redis.connection_timeout_ms must be between 100 and 30000 ms"
                        .to_string(),
                );
            }
            if !(100..=60000).contains(&redis.command_timeout_ms) {
                return Err(
                    "store.redis.command_timeout_ms must be between 100 and 60000 ms".to_string(),
                );
            }
            if redis.mode == RedisMode::Cluster && redis.cluster_nodes.is_empty() {
                return Err("store.redis.cluster_nodes cannot be empty in cluster mode".to_string());
            }
        }

        Ok(())
    }
}
