//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了Feed缓存系统的错误类型和处理机制。

use thiserror::Error;

/// Feed缓存系统错误类型枚举
///
/// 缓存未命中不是错误，它会触发回源加载；只有回源失败才会变成 `NotFound`
#[derive(Error, Debug)]
pub enum FeedError {
    /// 数据源中不存在请求的实体
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// 扇出任务队列已满
    #[error("Fan-out queue is full")]
    QueueFull,

    /// 缓存存储操作失败
    #[error("Store operation failed: {0}")]
    Store(String),

    /// Redis错误
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 事件通道错误
    #[error("Channel error: {0}")]
    Channel(String),

    /// 数据源（用户目录、帖子服务）调用失败
    #[error("Source error: {0}")]
    Source(String),

    /// 超时错误
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// 关闭错误
    #[error("Shutdown error: {0}")]
    Shutdown(String),
}

impl FeedError {
    /// 帖子不存在
    pub fn post_not_found(id: i64) -> Self {
        FeedError::NotFound { entity: "Post", id }
    }

    /// 是否为数据源中不存在的错误
    pub fn is_not_found(&self) -> bool {
        matches!(self, FeedError::NotFound { .. })
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        FeedError::Serialization(e.to_string())
    }
}

/// Feed缓存操作结果类型别名
pub type Result<T> = std::result::Result<T, FeedError>;
