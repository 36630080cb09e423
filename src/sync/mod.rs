//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存的异步写入路径：新帖子扇出、热度消息通道和热度管道。

pub mod channel;
pub mod fanout;
pub mod heat;

pub use channel::{
    Delivery, HeatPublisher, HeatSubscription, MemoryChannel, MemoryPublisher, MemorySubscription,
    RedisStreamPublisher, RedisStreamSubscription,
};
pub use fanout::{FanoutDistributor, FanoutExecutor};
pub use heat::{HandleOutcome, HeatConsumer, HeatProducer, HeatReport};
