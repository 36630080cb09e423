//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了热度消息通道：发布接口、订阅接口，以及内存和Redis Streams两种实现。
//!
//! 通道提供至少一次投递：消息处理完成后才确认，未确认的消息会被重新投递。

use crate::backend::redis_store::{RedisStore, StoreConnection};
use crate::config::ChannelConfig;
use crate::error::{FeedError, Result};
use crate::model::HeatBundle;
use crate::serialization::{JsonSerializer, Serializer};
use async_trait::async_trait;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

const PAYLOAD_FIELD: &str = "payload";

/// 一次投递
#[derive(Debug)]
pub struct Delivery {
    /// 投递标识，用于确认
    pub id: String,
    /// 解析后的消息；负载无法解析时为错误
    pub payload: Result<HeatBundle>,
}

/// 热度消息发布者
#[async_trait]
pub trait HeatPublisher: Send + Sync {
    async fn publish(&self, bundle: &HeatBundle) -> Result<()>;
}

/// 热度消息订阅
#[async_trait]
pub trait HeatSubscription: Send {
    /// 等待下一条消息
    ///
    /// # 返回值
    ///
    /// 通道关闭后返回None
    async fn next(&mut self) -> Result<Option<Delivery>>;

    /// 确认消息已处理
    async fn ack(&mut self, delivery_id: &str) -> Result<()>;
}

/// 进程内通道
///
/// 基于有界 `tokio::sync::mpsc`，适合单进程部署和测试；进程退出即丢失消息
pub struct MemoryChannel;

impl MemoryChannel {
    /// 创建一对发布者和订阅
    pub fn open(capacity: usize) -> (MemoryPublisher, MemorySubscription) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            MemoryPublisher {
                sender,
                sequence: Arc::new(AtomicU64::new(0)),
                serializer: JsonSerializer::new(),
            },
            MemorySubscription {
                receiver,
                serializer: JsonSerializer::new(),
            },
        )
    }

    pub fn from_config(config: &ChannelConfig) -> (MemoryPublisher, MemorySubscription) {
        Self::open(config.memory_capacity)
    }
}

/// 进程内通道的发布端
#[derive(Clone)]
pub struct MemoryPublisher {
    sender: mpsc::Sender<(String, Vec<u8>)>,
    sequence: Arc<AtomicU64>,
    serializer: JsonSerializer,
}

impl MemoryPublisher {
    /// 发布原始负载
    pub async fn publish_raw(&self, payload: Vec<u8>) -> Result<String> {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed).to_string();
        self.sender
            .send((id.clone(), payload))
            .await
            .map_err(|_| FeedError::Channel("memory channel is closed".to_string()))?;
        Ok(id)
    }
}

#[async_trait]
impl HeatPublisher for MemoryPublisher {
    async fn publish(&self, bundle: &HeatBundle) -> Result<()> {
        let payload = self.serializer.serialize(bundle)?;
        self.publish_raw(payload).await?;
        Ok(())
    }
}

/// 进程内通道的订阅端
pub struct MemorySubscription {
    receiver: mpsc::Receiver<(String, Vec<u8>)>,
    serializer: JsonSerializer,
}

#[async_trait]
impl HeatSubscription for MemorySubscription {
    async fn next(&mut self) -> Result<Option<Delivery>> {
        Ok(self.receiver.recv().await.map(|(id, payload)| Delivery {
            id,
            payload: self.serializer.deserialize(&payload),
        }))
    }

    async fn ack(&mut self, _delivery_id: &str) -> Result<()> {
        Ok(())
    }
}

/// Redis Streams 发布端
///
/// `XADD` 时带近似 `MAXLEN`，防止无人消费时无限增长
pub struct RedisStreamPublisher {
    connection: StoreConnection,
    topic: String,
    max_len: usize,
    serializer: JsonSerializer,
}

impl RedisStreamPublisher {
    pub fn new(store: &RedisStore, config: &ChannelConfig) -> Self {
        Self {
            connection: store.connection(),
            topic: config.topic.clone(),
            max_len: config.max_len,
            serializer: JsonSerializer::new(),
        }
    }
}

#[async_trait]
impl HeatPublisher for RedisStreamPublisher {
    #[instrument(skip(self, bundle), level = "debug", fields(follower_id = bundle.follower_id))]
    async fn publish(&self, bundle: &HeatBundle) -> Result<()> {
        let payload = self.serializer.serialize(bundle)?;
        let mut conn = self.connection.clone();
        let id: String = redis::cmd("XADD")
            .arg(&self.topic)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_len)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        debug!("published bundle {} as {}", bundle.bundle_id, id);
        Ok(())
    }
}

/// Redis Streams 订阅端
///
/// 使用消费者组读取；启动时先重读本消费者尚未确认的消息，再读取新消息
pub struct RedisStreamSubscription {
    connection: StoreConnection,
    topic: String,
    group: String,
    consumer: String,
    block_ms: usize,
    batch_size: usize,
    buffer: VecDeque<Delivery>,
    // 重读未确认消息时的起点，读完后为None
    pending_cursor: Option<String>,
    serializer: JsonSerializer,
}

impl RedisStreamSubscription {
    /// 建立订阅
    ///
    /// 使用独立连接，消费者组不存在时自动创建
    ///
    /// # 参数
    ///
    /// * `store` - Redis存储，用于建立独立连接
    /// * `config` - 通道配置
    pub async fn connect(store: &RedisStore, config: &ChannelConfig) -> Result<Self> {
        let mut connection = store.dedicated_connection().await?;
        let created: redis::RedisResult<()> = connection
            .xgroup_create_mkstream(&config.topic, &config.group, "0")
            .await;
        if let Err(e) = created {
            if e.code() != Some("BUSYGROUP") {
                return Err(e.into());
            }
        }
        info!(
            "Subscribed to stream {} as {}/{}",
            config.topic, config.group, config.consumer
        );
        Ok(Self {
            connection,
            topic: config.topic.clone(),
            group: config.group.clone(),
            consumer: config.consumer.clone(),
            block_ms: config.block_ms,
            batch_size: config.batch_size.max(1),
            buffer: VecDeque::new(),
            pending_cursor: Some("0".to_string()),
            serializer: JsonSerializer::new(),
        })
    }

    async fn fill(&mut self) -> Result<()> {
        let (start_id, options) = if let Some(cursor) = &self.pending_cursor {
            (
                cursor.clone(),
                StreamReadOptions::default()
                    .group(&self.group, &self.consumer)
                    .count(self.batch_size),
            )
        } else {
            (
                ">".to_string(),
                StreamReadOptions::default()
                    .group(&self.group, &self.consumer)
                    .count(self.batch_size)
                    .block(self.block_ms),
            )
        };

        let reply: Option<StreamReadReply> = self
            .connection
            .xread_options(&[&self.topic], &[start_id], &options)
            .await?;
        let entries: Vec<_> = reply
            .map(|reply| reply.keys.into_iter().flat_map(|key| key.ids).collect())
            .unwrap_or_default();

        if self.pending_cursor.is_some() {
            match entries.last() {
                Some(last) => self.pending_cursor = Some(last.id.clone()),
                None => {
                    debug!("no pending entries left on {}", self.topic);
                    self.pending_cursor = None;
                }
            }
        }
        for entry in entries {
            let raw = entry.get::<Vec<u8>>(PAYLOAD_FIELD);
            let payload = self.serializer.deserialize_field(PAYLOAD_FIELD, raw.as_deref());
            self.buffer.push_back(Delivery {
                id: entry.id,
                payload,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl HeatSubscription for RedisStreamSubscription {
    async fn next(&mut self) -> Result<Option<Delivery>> {
        loop {
            if let Some(delivery) = self.buffer.pop_front() {
                return Ok(Some(delivery));
            }
            if let Err(e) = self.fill().await {
                warn!("Reading stream {} failed: {}", self.topic, e);
                return Err(e);
            }
        }
    }

    async fn ack(&mut self, delivery_id: &str) -> Result<()> {
        let _: i64 = self
            .connection
            .xack(&self.topic, &self.group, &[delivery_id])
            .await?;
        Ok(())
    }
}
