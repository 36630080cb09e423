//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存值与消息负载的序列化机制。
//!
//! 帖子正文、作者条目和热度消息都经由同一个序列化器编码，存储层只看到字节。

pub mod json;

use crate::error::{FeedError, Result};
use serde::{de::DeserializeOwned, Serialize};

pub use json::JsonSerializer;

/// 序列化器特征
pub trait Serializer: Send + Sync {
    /// 序列化值为字节数组
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// 从字节数组反序列化值
    fn deserialize<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T>;

    /// 反序列化哈希或Stream条目中的某个字段
    ///
    /// # 参数
    ///
    /// * `field` - 字段名，只用于错误信息
    /// * `data` - 字段内容，字段缺失时为None
    ///
    /// # 返回值
    ///
    /// 字段缺失或内容无法解析时返回 `Serialization` 错误
    fn deserialize_field<T: DeserializeOwned>(&self, field: &str, data: Option<&[u8]>) -> Result<T> {
        match data {
            Some(bytes) => self.deserialize(bytes),
            None => Err(FeedError::Serialization(format!(
                "entry has no {} field",
                field
            ))),
        }
    }
}
