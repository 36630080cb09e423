//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了基于Redis的缓存存储，支持单机和集群模式。

use super::{CacheStore, HashFields};
use crate::config::{RedisConfig, RedisMode};
use crate::error::{FeedError, Result};
use async_trait::async_trait;
use futures::future::try_join_all;
use lazy_static::lazy_static;
use redis::aio::{ConnectionLike, ConnectionManager};
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{Client, Cmd, Pipeline, RedisFuture, RedisResult, Script, Value};
use secrecy::ExposeSecret;
use std::collections::HashMap;
use std::future::Future;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, instrument};

lazy_static! {
    static ref INCR_IF_EXISTS: Script = Script::new(
        r#"
        if redis.call('EXISTS', KEYS[1]) == 1 then
            return redis.call('HINCRBY', KEYS[1], ARGV[1], ARGV[2])
        end
        return false
        "#,
    );
    static ref SET_FIELD_IF_EXISTS: Script = Script::new(
        r#"
        if redis.call('EXISTS', KEYS[1]) == 1 then
            redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
            return 1
        end
        return 0
        "#,
    );
    // ARGV[1] = 最大长度（-1 表示不裁剪），之后依次为 score, member
    static ref ZADD_AND_TRIM: Script = Script::new(
        r#"
        local max_len = tonumber(ARGV[1])
        for i = 2, #ARGV, 2 do
            redis.call('ZADD', KEYS[1], ARGV[i], ARGV[i + 1])
        end
        local card = redis.call('ZCARD', KEYS[1])
        if max_len >= 0 and card > max_len then
            redis.call('ZREMRANGEBYRANK', KEYS[1], 0, card - max_len - 1)
            card = max_len
        end
        return card
        "#,
    );
}

/// Redis连接
///
/// 单机模式使用 `ConnectionManager`（自动重连），集群模式使用集群异步连接
#[derive(Clone)]
pub enum StoreConnection {
    Standalone(ConnectionManager),
    Cluster(ClusterConnection),
}

impl ConnectionLike for StoreConnection {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
        match self {
            StoreConnection::Standalone(conn) => conn.req_packed_command(cmd),
            StoreConnection::Cluster(conn) => conn.req_packed_command(cmd),
        }
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        cmd: &'a Pipeline,
        offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        match self {
            StoreConnection::Standalone(conn) => conn.req_packed_commands(cmd, offset, count),
            StoreConnection::Cluster(conn) => conn.req_packed_commands(cmd, offset, count),
        }
    }

    fn get_db(&self) -> i64 {
        match self {
            StoreConnection::Standalone(conn) => conn.get_db(),
            StoreConnection::Cluster(conn) => conn.get_db(),
        }
    }
}

#[derive(Clone)]
enum RedisClient {
    Standalone(Client),
    Cluster(ClusterClient),
}

/// 基于Redis的缓存存储
///
/// 复合操作通过Lua脚本在服务端原子执行
#[derive(Clone)]
pub struct RedisStore {
    client: RedisClient,
    connection: StoreConnection,
    connection_timeout_ms: u64,
    command_timeout_ms: u64,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.client {
            RedisClient::Standalone(_) => write!(f, "RedisStore::Standalone"),
            RedisClient::Cluster(_) => write!(f, "RedisStore::Cluster"),
        }
    }
}

async fn connect_with_timeout<T, F>(timeout_ms: u64, fut: F) -> Result<T>
where
    F: Future<Output = RedisResult<T>>,
{
    match timeout(Duration::from_millis(timeout_ms), fut).await {
        Ok(res) => Ok(res?),
        Err(_) => Err(FeedError::Timeout(format!(
            "Redis connection timed out after {}ms",
            timeout_ms
        ))),
    }
}

impl RedisStore {
    /// 根据配置连接Redis
    ///
    /// # 参数
    ///
    /// * `config` - Redis配置
    ///
    /// # 返回值
    ///
    /// 返回新的RedisStore实例或错误
    #[instrument(skip(config), level = "info", name = "init_redis_store", fields(mode = ?config.mode))]
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let (client, connection) = match config.mode {
            RedisMode::Standalone => {
                let client = Client::open(config.connection_string.expose_secret())?;
                let manager =
                    connect_with_timeout(config.connection_timeout_ms, client.get_connection_manager())
                        .await?;
                (
                    RedisClient::Standalone(client),
                    StoreConnection::Standalone(manager),
                )
            }
            RedisMode::Cluster => {
                if config.cluster_nodes.is_empty() {
                    return Err(FeedError::Configuration(
                        "Cluster nodes are missing".to_string(),
                    ));
                }
                let client = ClusterClient::new(config.cluster_nodes.clone())?;
                let connection =
                    connect_with_timeout(config.connection_timeout_ms, client.get_async_connection())
                        .await?;
                (
                    RedisClient::Cluster(client),
                    StoreConnection::Cluster(connection),
                )
            }
        };
        info!("Redis store connected");
        Ok(Self {
            client,
            connection,
            connection_timeout_ms: config.connection_timeout_ms,
            command_timeout_ms: config.command_timeout_ms,
        })
    }

    /// 获取共享连接
    pub fn connection(&self) -> StoreConnection {
        self.connection.clone()
    }

    /// 建立一条独立连接，用于阻塞读取等会长时间占用连接的命令
    pub async fn dedicated_connection(&self) -> Result<StoreConnection> {
        match &self.client {
            RedisClient::Standalone(client) => {
                let manager =
                    connect_with_timeout(self.connection_timeout_ms, client.get_connection_manager())
                        .await?;
                Ok(StoreConnection::Standalone(manager))
            }
            RedisClient::Cluster(client) => {
                let connection =
                    connect_with_timeout(self.connection_timeout_ms, client.get_async_connection())
                        .await?;
                Ok(StoreConnection::Cluster(connection))
            }
        }
    }

    /// 命令执行超时时间（毫秒）
    pub fn command_timeout_ms(&self) -> u64 {
        self.command_timeout_ms
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match timeout(Duration::from_millis(self.command_timeout_ms), fut).await {
            Ok(res) => Ok(res?),
            Err(_) => Err(FeedError::Timeout(format!(
                "Redis command timed out after {}ms",
                self.command_timeout_ms
            ))),
        }
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    #[instrument(skip(self), level = "debug")]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection();
        self.timed(redis::cmd("GET").arg(key).query_async(&mut conn))
            .await
    }

    #[instrument(skip(self, value), level = "debug", fields(value_len = value.len()))]
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<u64>) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl);
        }
        let mut conn = self.connection();
        self.timed(cmd.query_async::<()>(&mut conn)).await
    }

    #[instrument(skip(self, keys), level = "debug", fields(key_count = keys.len()))]
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        try_join_all(keys.iter().map(|key| self.get(key))).await
    }

    #[instrument(skip(self, items), level = "debug", fields(item_count = items.len()))]
    async fn set_many(&self, items: Vec<(String, Vec<u8>)>, ttl: Option<u64>) -> Result<()> {
        try_join_all(
            items
                .into_iter()
                .map(|(key, value)| async move { self.set(&key, value, ttl).await }),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, fields), level = "debug", fields(field_count = fields.len()))]
    async fn hash_put(
        &self,
        key: &str,
        fields: Vec<(String, Vec<u8>)>,
        ttl: Option<u64>,
    ) -> Result<()> {
        let mut pipe = redis::pipe();
        pipe.atomic().del(key).ignore();
        if !fields.is_empty() {
            pipe.hset_multiple(key, &fields).ignore();
        }
        if let Some(ttl) = ttl {
            pipe.expire(key, ttl as i64).ignore();
        }
        let mut conn = self.connection();
        self.timed(pipe.query_async::<()>(&mut conn)).await
    }

    #[instrument(skip(self, keys), level = "debug", fields(key_count = keys.len()))]
    async fn hash_get_all_many(&self, keys: &[String]) -> Result<Vec<Option<HashFields>>> {
        try_join_all(keys.iter().map(|key| async move {
            let mut conn = self.connection();
            let fields: HashMap<String, Vec<u8>> = self
                .timed(redis::cmd("HGETALL").arg(key).query_async(&mut conn))
                .await?;
            Ok::<_, FeedError>(if fields.is_empty() { None } else { Some(fields) })
        }))
        .await
    }

    #[instrument(skip(self), level = "debug")]
    async fn hash_incr_if_exists(
        &self,
        key: &str,
        field: &str,
        delta: i64,
    ) -> Result<Option<i64>> {
        let mut conn = self.connection();
        let mut invocation = INCR_IF_EXISTS.key(key);
        invocation.arg(field).arg(delta);
        self.timed(invocation.invoke_async(&mut conn)).await
    }

    #[instrument(skip(self, value), level = "debug")]
    async fn hash_set_if_exists(&self, key: &str, field: &str, value: Vec<u8>) -> Result<bool> {
        let mut conn = self.connection();
        let mut invocation = SET_FIELD_IF_EXISTS.key(key);
        invocation.arg(field).arg(value);
        let written: i64 = self.timed(invocation.invoke_async(&mut conn)).await?;
        Ok(written == 1)
    }

    #[instrument(skip(self, members), level = "debug", fields(member_count = members.len()))]
    async fn sorted_add(
        &self,
        key: &str,
        members: Vec<(String, i64)>,
        max_len: Option<usize>,
    ) -> Result<u64> {
        let mut invocation = ZADD_AND_TRIM.key(key);
        invocation.arg(max_len.map(|m| m as i64).unwrap_or(-1));
        for (member, score) in &members {
            invocation.arg(*score).arg(member);
        }
        let mut conn = self.connection();
        let card: u64 = self.timed(invocation.invoke_async(&mut conn)).await?;
        debug!("sorted_add: key={}, card={}", key, card);
        Ok(card)
    }

    async fn sorted_rev_range(&self, key: &str, start: u64, stop: u64) -> Result<Vec<String>> {
        if stop < start {
            return Ok(Vec::new());
        }
        let mut conn = self.connection();
        self.timed(
            redis::cmd("ZREVRANGE")
                .arg(key)
                .arg(start)
                .arg(stop)
                .query_async(&mut conn),
        )
        .await
    }

    async fn sorted_rev_rank(&self, key: &str, member: &str) -> Result<Option<u64>> {
        let mut conn = self.connection();
        self.timed(
            redis::cmd("ZREVRANK")
                .arg(key)
                .arg(member)
                .query_async(&mut conn),
        )
        .await
    }

    async fn sorted_card(&self, key: &str) -> Result<u64> {
        let mut conn = self.connection();
        self.timed(redis::cmd("ZCARD").arg(key).query_async(&mut conn))
            .await
    }

    async fn sorted_score(&self, key: &str, member: &str) -> Result<Option<i64>> {
        let mut conn = self.connection();
        let score: Option<f64> = self
            .timed(
                redis::cmd("ZSCORE")
                    .arg(key)
                    .arg(member)
                    .query_async(&mut conn),
            )
            .await?;
        Ok(score.map(|s| s as i64))
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection();
        self.timed(redis::cmd("DEL").arg(key).query_async::<()>(&mut conn))
            .await
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection();
        let response: String = self
            .timed(redis::cmd("PING").query_async(&mut conn))
            .await?;
        debug!("RedisStore ping: {}", response);
        Ok(())
    }
}
