//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了Feed管理器，负责组装各个缓存组件并对外提供读取和事件入口。

use crate::backend::{self, CacheStore};
use crate::cache::{AuthorCache, FeedIndex, PostCache};
use crate::config::Config;
use crate::error::{FeedError, Result};
use crate::model::{AuthorCacheEntry, CommentSnapshot, PostSnapshot, PostView};
use crate::source::{PostSource, UserDirectory};
use crate::sync::{
    FanoutDistributor, FanoutExecutor, HeatConsumer, HeatProducer, HeatPublisher, HeatReport,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// 热度管道所需的外部组件
pub struct HeatSources {
    pub directory: Arc<dyn UserDirectory>,
    pub publisher: Arc<dyn HeatPublisher>,
}

// 预热结束（包括panic）时清除运行标记
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn run_exclusive(
    producer: &HeatProducer,
    running: &Arc<AtomicBool>,
) -> Option<Result<HeatReport>> {
    if running.swap(true, Ordering::AcqRel) {
        info!("Heat refresh already in progress, skipping");
        return None;
    }
    let _guard = RunningGuard(running.clone());
    Some(producer.run().await)
}

/// Feed管理器
///
/// 配置在构造时传入，运行期间不可变。必须在tokio运行时内创建。
pub struct FeedManager {
    config: Config,
    store: Arc<dyn CacheStore>,
    posts: Arc<PostCache>,
    authors: Arc<AuthorCache>,
    feed: Arc<FeedIndex>,
    executor: Arc<FanoutExecutor>,
    distributor: FanoutDistributor,
    directory: Option<Arc<dyn UserDirectory>>,
    producer: Option<Arc<HeatProducer>>,
    heat_running: Arc<AtomicBool>,
    shutdown: CancellationToken,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl FeedManager {
    /// 创建Feed管理器
    ///
    /// # 参数
    ///
    /// * `config` - 配置
    /// * `store` - 缓存存储
    /// * `post_source` - 帖子数据源
    /// * `heat` - 热度管道组件，None 表示不启用预热
    ///
    /// # 返回值
    ///
    /// 配置无效时返回 `Configuration` 错误
    pub fn new(
        config: Config,
        store: Arc<dyn CacheStore>,
        post_source: Arc<dyn PostSource>,
        heat: Option<HeatSources>,
    ) -> Result<Self> {
        config.validate().map_err(FeedError::Configuration)?;

        let posts = Arc::new(PostCache::new(
            store.clone(),
            post_source.clone(),
            config.post_cache.clone(),
        ));
        let authors = Arc::new(AuthorCache::new(store.clone(), config.author_cache.clone()));
        let feed = Arc::new(FeedIndex::new(
            store.clone(),
            posts.clone(),
            config.feed.clone(),
        ));
        let executor = Arc::new(FanoutExecutor::new(&config.fanout));
        let distributor = FanoutDistributor::new(executor.clone(), feed.clone(), &config.fanout);
        let directory = heat.as_ref().map(|heat| heat.directory.clone());
        let producer = heat.map(|heat| {
            Arc::new(HeatProducer::new(
                heat.directory,
                post_source,
                authors.clone(),
                heat.publisher,
                config.heat.clone(),
            ))
        });

        info!(
            "FeedManager initialized: store={:?}, heat={}",
            config.store.backend,
            producer.is_some()
        );
        Ok(Self {
            config,
            store,
            posts,
            authors,
            feed,
            executor,
            distributor,
            directory,
            producer,
            heat_running: Arc::new(AtomicBool::new(false)),
            shutdown: CancellationToken::new(),
            scheduler: Mutex::new(None),
        })
    }

    /// 按配置连接存储后创建管理器
    #[instrument(skip_all, level = "info")]
    pub async fn connect(
        config: Config,
        post_source: Arc<dyn PostSource>,
        heat: Option<HeatSources>,
    ) -> Result<Self> {
        config.validate().map_err(FeedError::Configuration)?;
        let store = backend::connect(&config.store).await?;
        Self::new(config, store, post_source, heat)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn CacheStore> {
        self.store.clone()
    }

    pub fn posts(&self) -> Arc<PostCache> {
        self.posts.clone()
    }

    pub fn authors(&self) -> Arc<AuthorCache> {
        self.authors.clone()
    }

    pub fn feed(&self) -> Arc<FeedIndex> {
        self.feed.clone()
    }

    /// 读取一页Feed
    ///
    /// 作者信息从作者缓存补全；配置了用户目录时，缓存缺失的作者从目录批量读取并回填。
    /// 作者缓存不可用时返回不带作者信息的帖子
    ///
    /// # 参数
    ///
    /// * `user_id` - 用户ID
    /// * `cursor` - 上一页最后一个帖子ID
    #[instrument(skip(self), level = "debug")]
    pub async fn get_feed(&self, user_id: i64, cursor: Option<i64>) -> Result<Vec<PostView>> {
        let entries = self.feed.get_feed(user_id, cursor).await?;
        let author_ids: Vec<i64> = entries.iter().map(|entry| entry.author_id).collect();
        let authors = match self.authors.get_many(&author_ids).await {
            Ok(mut authors) => {
                self.backfill_authors(&author_ids, &mut authors).await;
                authors
            }
            Err(e) => {
                warn!("Author cache unavailable, serving feed without authors: {}", e);
                Default::default()
            }
        };

        Ok(entries
            .into_iter()
            .map(|entry| {
                let author = authors.get(&entry.author_id).cloned();
                PostView::from_entry(entry, author)
            })
            .collect())
    }

    // 目录读取或回填失败只记录日志，Feed照常返回
    async fn backfill_authors(
        &self,
        author_ids: &[i64],
        authors: &mut HashMap<i64, AuthorCacheEntry>,
    ) {
        let Some(directory) = &self.directory else {
            return;
        };
        let mut missing: Vec<i64> = author_ids
            .iter()
            .copied()
            .filter(|id| !authors.contains_key(id))
            .collect();
        missing.sort_unstable();
        missing.dedup();
        if missing.is_empty() {
            return;
        }

        let users = match directory.fetch_users_by_ids(missing).await {
            Ok(users) => users,
            Err(e) => {
                warn!("Fetching uncached authors from directory failed: {}", e);
                return;
            }
        };
        if let Err(e) = self.authors.save_all(&users).await {
            warn!("Backfilling {} authors failed: {}", users.len(), e);
        }
        debug!("backfilled {} authors", users.len());
        authors.extend(users.iter().map(|user| (user.id, AuthorCacheEntry::from(user))));
    }

    /// 新帖子发布
    ///
    /// 写入帖子缓存，再异步扇出到全部粉丝
    #[instrument(skip(self, post, follower_ids), level = "debug", fields(post_id = post.id, followers = follower_ids.len()))]
    pub async fn on_post_published(&self, post: &PostSnapshot, follower_ids: Vec<i64>) -> Result<()> {
        self.posts.save(post).await?;
        self.distributor
            .distribute_to_followers(post.id, follower_ids, post.published_at)
            .await
    }

    pub async fn record_view(&self, post_id: i64) -> Result<()> {
        self.posts.increment_views(post_id).await
    }

    pub async fn record_like(&self, post_id: i64) -> Result<()> {
        self.posts.increment_likes(post_id).await
    }

    pub async fn add_comment(&self, post_id: i64, comment: CommentSnapshot) -> Result<()> {
        self.posts.add_comment(post_id, comment).await
    }

    /// 触发一次预热并立即返回
    ///
    /// # 返回值
    ///
    /// 已有预热在进行时返回 `Ok(false)`；未配置热度管道时返回 `Configuration` 错误
    pub fn trigger_heat_refresh(&self) -> Result<bool> {
        let producer = self.heat_producer()?;
        if self.heat_running.load(Ordering::Acquire) {
            debug!("heat refresh already running");
            return Ok(false);
        }
        let running = self.heat_running.clone();
        tokio::spawn(async move {
            if let Some(Err(e)) = run_exclusive(&producer, &running).await {
                error!("Heat refresh failed: {}", e);
            }
        });
        Ok(true)
    }

    /// 执行一次预热并等待完成
    ///
    /// # 返回值
    ///
    /// 已有预热在进行时返回 `Ok(None)`
    pub async fn run_heat_refresh(&self) -> Result<Option<HeatReport>> {
        let producer = self.heat_producer()?;
        run_exclusive(&producer, &self.heat_running)
            .await
            .transpose()
    }

    /// 是否有预热正在进行
    pub fn heat_refresh_running(&self) -> bool {
        self.heat_running.load(Ordering::Acquire)
    }

    /// 按 `heat.refresh_interval_secs` 启动定时预热
    ///
    /// # 返回值
    ///
    /// 未配置间隔或未启用热度管道时返回false
    pub async fn start_heat_scheduler(&self) -> bool {
        let (Some(secs), Some(producer)) =
            (self.config.heat.refresh_interval_secs, self.producer.clone())
        else {
            return false;
        };
        let mut scheduler = self.scheduler.lock().await;
        if scheduler.is_some() {
            return true;
        }

        let running = self.heat_running.clone();
        let shutdown = self.shutdown.clone();
        *scheduler = Some(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Some(Err(e)) = run_exclusive(&producer, &running).await {
                            error!("Scheduled heat refresh failed: {}", e);
                        }
                    }
                }
            }
            debug!("heat scheduler stopped");
        }));
        info!("Heat scheduler started, interval={}s", secs);
        true
    }

    /// 基于本管理器的缓存创建热度消费者
    pub fn heat_consumer(&self) -> HeatConsumer {
        HeatConsumer::new(self.posts.clone(), self.feed.clone(), &self.config.heat)
    }

    /// 取消令牌，在 [`FeedManager::shutdown`] 时触发
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// 关闭管理器
    ///
    /// 停止定时预热并等待已提交的扇出任务完成
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.scheduler.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("Heat scheduler ended abnormally: {}", e);
            }
        }
        self.executor.shutdown().await;
        info!("FeedManager shut down");
    }

    fn heat_producer(&self) -> Result<Arc<HeatProducer>> {
        self.producer.clone().ok_or_else(|| {
            FeedError::Configuration("heat pipeline is not configured".to_string())
        })
    }
}
