//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了热度管道：生产者扫描用户并为每个粉丝发布预热消息，
//! 消费者把消息写入帖子缓存和Feed索引。

use super::channel::{Delivery, HeatPublisher, HeatSubscription};
use crate::bounded_map::{BoundedMap, EvictionOrder};
use crate::cache::{AuthorCache, FeedIndex, PostCache};
use crate::config::HeatConfig;
use crate::error::Result;
use crate::metrics::GLOBAL_METRICS;
use crate::model::{HeatBundle, PostSnapshot, UserProfile};
use crate::source::{PostSource, UserDirectory};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// 一次预热的统计结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeatReport {
    pub users: usize,
    pub authors_refreshed: usize,
    pub author_failures: usize,
    pub source_failures: usize,
    pub bundles_published: usize,
    pub publish_failures: usize,
}

/// 热度生产者
pub struct HeatProducer {
    directory: Arc<dyn UserDirectory>,
    source: Arc<dyn PostSource>,
    authors: Arc<AuthorCache>,
    publisher: Arc<dyn HeatPublisher>,
    config: HeatConfig,
}

impl HeatProducer {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        source: Arc<dyn PostSource>,
        authors: Arc<AuthorCache>,
        publisher: Arc<dyn HeatPublisher>,
        config: HeatConfig,
    ) -> Self {
        Self {
            directory,
            source,
            authors,
            publisher,
            config,
        }
    }

    /// 执行一次预热
    ///
    /// 先并发刷新全部作者缓存并等待完成，再按作者的粉丝列表分组、拉取作者最近帖子，
    /// 最后为每个粉丝发布一条消息。单个作者或单条消息失败只计数，不中断本次预热。
    ///
    /// # 返回值
    ///
    /// 返回本次预热的统计；只有读取用户目录失败才返回错误
    #[instrument(skip(self), level = "info", name = "heat_run")]
    pub async fn run(&self) -> Result<HeatReport> {
        let started = Instant::now();
        let users = self.directory.fetch_all_users().await?;
        let mut report = HeatReport {
            users: users.len(),
            ..HeatReport::default()
        };

        let refreshed = join_all(users.iter().map(|user| self.authors.save(user))).await;
        for (user, result) in users.iter().zip(refreshed) {
            match result {
                Ok(()) => report.authors_refreshed += 1,
                Err(e) => {
                    warn!("Refreshing author {} failed: {}", user.id, e);
                    report.author_failures += 1;
                }
            }
        }

        let followees_by_follower = followees_by_follower(&users);

        let limit = self.config.max_posts_in_heat_feed;
        let author_ids: Vec<i64> = users.iter().map(|user| user.id).collect();
        let fetched: Vec<(i64, Result<Vec<PostSnapshot>>)> = stream::iter(author_ids)
            .map(|author_id| async move {
                (
                    author_id,
                    self.source.get_recent_posts_by_author(author_id, limit).await,
                )
            })
            .buffer_unordered(self.config.source_concurrency.max(1))
            .collect()
            .await;
        let mut posts_by_author: HashMap<i64, Vec<PostSnapshot>> = HashMap::new();
        for (author_id, result) in fetched {
            match result {
                Ok(posts) => {
                    posts_by_author.insert(author_id, posts);
                }
                Err(e) => {
                    warn!("Fetching recent posts of author {} failed: {}", author_id, e);
                    report.source_failures += 1;
                }
            }
        }

        for (follower_id, author_ids) in &followees_by_follower {
            let posts = collect_bundle_posts(author_ids, &posts_by_author);
            if posts.is_empty() {
                debug!("nothing to warm for follower {}", follower_id);
                continue;
            }
            let bundle = HeatBundle::new(*follower_id, posts);
            match self.publisher.publish(&bundle).await {
                Ok(()) => report.bundles_published += 1,
                Err(e) => {
                    warn!("Publishing heat bundle for follower {} failed: {}", follower_id, e);
                    report.publish_failures += 1;
                    GLOBAL_METRICS.record_request("heat", "publish", "error");
                }
            }
        }

        GLOBAL_METRICS.record_duration("heat", "run", started.elapsed().as_secs_f64());
        info!(
            "Heat run finished: users={}, bundles={}, author_failures={}, source_failures={}, publish_failures={}",
            report.users,
            report.bundles_published,
            report.author_failures,
            report.source_failures,
            report.publish_failures
        );
        Ok(report)
    }
}

/// 按作者的粉丝列表反查每个粉丝关注的作者，粉丝按ID升序
fn followees_by_follower(users: &[UserProfile]) -> BTreeMap<i64, Vec<i64>> {
    let mut followees: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
    for user in users {
        for follower_id in &user.follower_ids {
            followees.entry(*follower_id).or_default().push(user.id);
        }
    }
    followees
}

/// 合并粉丝关注的作者的帖子：最新在前，按帖子ID去重
fn collect_bundle_posts(
    author_ids: &[i64],
    posts_by_author: &HashMap<i64, Vec<PostSnapshot>>,
) -> Vec<PostSnapshot> {
    let mut posts: Vec<PostSnapshot> = author_ids
        .iter()
        .filter_map(|author_id| posts_by_author.get(author_id))
        .flatten()
        .cloned()
        .collect();
    posts.sort_by(|a, b| {
        b.published_at
            .cmp(&a.published_at)
            .then_with(|| b.id.cmp(&a.id))
    });
    let mut seen = HashSet::with_capacity(posts.len());
    posts.retain(|post| seen.insert(post.id));
    posts
}

/// 单条消息的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// 已写入缓存
    Applied,
    /// 最近已处理过，直接跳过
    Duplicate,
    /// 重试耗尽后丢弃
    Dropped,
}

/// 热度消费者
///
/// 写入是幂等的，重复投递只会重复覆盖同样的数据
pub struct HeatConsumer {
    posts: Arc<PostCache>,
    feed: Arc<FeedIndex>,
    max_retries: u32,
    retry_backoff: Duration,
    recent: Option<Mutex<BoundedMap<Uuid, ()>>>,
}

impl HeatConsumer {
    pub fn new(posts: Arc<PostCache>, feed: Arc<FeedIndex>, config: &HeatConfig) -> Self {
        let recent = (config.dedupe_window > 0)
            .then(|| Mutex::new(BoundedMap::new(config.dedupe_window, EvictionOrder::Insertion)));
        Self {
            posts,
            feed,
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            recent,
        }
    }

    /// 处理一条消息
    ///
    /// 失败时按固定间隔重试 `max_retries` 次，全部失败后记录错误并丢弃
    #[instrument(skip(self, bundle), level = "debug", fields(bundle_id = %bundle.bundle_id, follower_id = bundle.follower_id))]
    pub async fn handle(&self, bundle: &HeatBundle) -> HandleOutcome {
        if let Some(recent) = &self.recent {
            if recent.lock().await.contains_key(&bundle.bundle_id) {
                debug!("bundle {} applied recently, skipping", bundle.bundle_id);
                GLOBAL_METRICS.record_request("heat", "consume", "duplicate");
                return HandleOutcome::Duplicate;
            }
        }

        let attempts = self.max_retries.saturating_add(1);
        for attempt in 1..=attempts {
            match self.apply(bundle).await {
                Ok(()) => {
                    if let Some(recent) = &self.recent {
                        recent.lock().await.put(bundle.bundle_id, ());
                    }
                    GLOBAL_METRICS.record_request("heat", "consume", "applied");
                    return HandleOutcome::Applied;
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        "Applying bundle {} failed (attempt {}/{}): {}",
                        bundle.bundle_id, attempt, attempts, e
                    );
                    sleep(self.retry_backoff).await;
                }
                Err(e) => {
                    error!(
                        "Dropping bundle {} for follower {} after {} attempts: {}",
                        bundle.bundle_id, bundle.follower_id, attempts, e
                    );
                }
            }
        }
        GLOBAL_METRICS.record_request("heat", "consume", "dropped");
        HandleOutcome::Dropped
    }

    async fn apply(&self, bundle: &HeatBundle) -> Result<()> {
        self.posts.save_all(&bundle.posts).await?;
        self.feed.bulk_insert(bundle).await?;
        Ok(())
    }

    /// 处理一次投递并确认
    ///
    /// 无法解析的负载直接确认，不再重试
    pub async fn process<S>(&self, subscription: &mut S, delivery: Delivery) -> Result<()>
    where
        S: HeatSubscription + ?Sized,
    {
        match &delivery.payload {
            Ok(bundle) => {
                self.handle(bundle).await;
            }
            Err(e) => {
                error!("Discarding malformed heat message {}: {}", delivery.id, e);
                GLOBAL_METRICS.record_request("heat", "consume", "malformed");
            }
        }
        subscription.ack(&delivery.id).await
    }

    /// 持续消费直到取消或通道关闭
    ///
    /// # 参数
    ///
    /// * `subscription` - 消息订阅
    /// * `shutdown` - 取消令牌
    pub async fn run<S>(&self, mut subscription: S, shutdown: CancellationToken) -> Result<()>
    where
        S: HeatSubscription,
    {
        info!("Heat consumer started");
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = subscription.next() => next,
            };
            match next {
                Ok(Some(delivery)) => {
                    if let Err(e) = self.process(&mut subscription, delivery).await {
                        warn!("Acknowledging heat message failed: {}", e);
                    }
                }
                Ok(None) => {
                    info!("Heat channel closed");
                    break;
                }
                Err(e) => {
                    warn!("Receiving heat message failed: {}", e);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(self.retry_backoff) => {}
                    }
                }
            }
        }
        info!("Heat consumer stopped");
        Ok(())
    }
}
