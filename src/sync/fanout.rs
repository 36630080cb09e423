//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了扇出执行器和扇出分发器。
//!
//! 新帖子发布后，分发器把"写入每个粉丝Feed"打包成一个任务交给执行器，调用方立即返回。

use crate::cache::FeedIndex;
use crate::config::FanoutConfig;
use crate::error::{FeedError, Result};
use crate::metrics::GLOBAL_METRICS;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

type Job = BoxFuture<'static, ()>;

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn run_job(job: Job) {
    if let Err(panic) = AssertUnwindSafe(job).catch_unwind().await {
        error!("Fan-out job panicked: {}", panic_message(panic.as_ref()));
        GLOBAL_METRICS.record_request("fanout", "job", "panic");
    }
}

/// 扇出执行器
///
/// 有界队列由 `core_pool_size` 个常驻工作者消费；队列满时最多再启动
/// `max_pool_size - core_pool_size` 个溢出任务直接执行；仍然不够时提交失败并返回
/// [`FeedError::QueueFull`]。必须在tokio运行时内创建。
pub struct FanoutExecutor {
    sender: RwLock<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    overflow: Arc<Semaphore>,
    overflow_limit: usize,
    queue_capacity: usize,
}

impl FanoutExecutor {
    /// 创建执行器并启动常驻工作者
    ///
    /// # 参数
    ///
    /// * `config` - 扇出配置
    pub fn new(config: &FanoutConfig) -> Self {
        let queue_capacity = config.queue_capacity.max(1);
        let core = config.core_pool_size.max(1);
        let overflow_limit = config.max_pool_size.saturating_sub(core);
        let (sender, receiver) = mpsc::channel::<Job>(queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..core)
            .map(|worker_id| {
                let receiver = receiver.clone();
                tokio::spawn(async move {
                    loop {
                        let job = {
                            let mut receiver = receiver.lock().await;
                            receiver.recv().await
                        };
                        match job {
                            Some(job) => run_job(job).await,
                            None => break,
                        }
                    }
                    debug!("fan-out worker {} stopped", worker_id);
                })
            })
            .collect();

        info!(
            "Fan-out executor started: core={}, overflow={}, queue={}",
            core, overflow_limit, queue_capacity
        );
        Self {
            sender: RwLock::new(Some(sender)),
            workers: Mutex::new(workers),
            overflow: Arc::new(Semaphore::new(overflow_limit)),
            overflow_limit,
            queue_capacity,
        }
    }

    /// 提交任务
    ///
    /// # 返回值
    ///
    /// 队列和溢出容量都用尽时返回 `QueueFull`，执行器已关闭时返回 `Shutdown`
    pub async fn submit<F>(&self, job: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.sender.read().await;
        let Some(sender) = guard.as_ref() else {
            return Err(FeedError::Shutdown("fan-out executor is shut down".to_string()));
        };

        let result = match sender.try_send(job.boxed()) {
            Ok(()) => {
                GLOBAL_METRICS.record_request("fanout", "submit", "queued");
                Ok(())
            }
            Err(TrySendError::Full(job)) => match self.overflow.clone().try_acquire_owned() {
                Ok(permit) => {
                    GLOBAL_METRICS.record_request("fanout", "submit", "overflow");
                    tokio::spawn(async move {
                        run_job(job).await;
                        drop(permit);
                    });
                    Ok(())
                }
                Err(_) => {
                    warn!("Fan-out queue is full, rejecting job");
                    GLOBAL_METRICS.record_request("fanout", "submit", "rejected");
                    Err(FeedError::QueueFull)
                }
            },
            Err(TrySendError::Closed(_)) => Err(FeedError::Shutdown(
                "fan-out queue is closed".to_string(),
            )),
        };
        GLOBAL_METRICS.set_queue_depth("fanout", self.queue_capacity - sender.capacity());
        result
    }

    /// 队列中等待执行的任务数
    pub async fn queued(&self) -> usize {
        match self.sender.read().await.as_ref() {
            Some(sender) => self.queue_capacity - sender.capacity(),
            None => 0,
        }
    }

    /// 关闭执行器
    ///
    /// 停止接收新任务，等待已排队任务和溢出任务全部完成
    pub async fn shutdown(&self) {
        let sender = self.sender.write().await.take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let workers = std::mem::take(&mut *self.workers.lock().await);
        for worker in workers {
            if let Err(e) = worker.await {
                warn!("Fan-out worker ended abnormally: {}", e);
            }
        }
        if self.overflow_limit > 0 {
            let _ = self.overflow.acquire_many(self.overflow_limit as u32).await;
        }
        GLOBAL_METRICS.set_queue_depth("fanout", 0);
        info!("Fan-out executor shut down");
    }
}

/// 扇出分发器
///
/// 把一篇新帖子写入全部粉丝的Feed
pub struct FanoutDistributor {
    executor: Arc<FanoutExecutor>,
    feed: Arc<FeedIndex>,
    follower_concurrency: usize,
}

impl FanoutDistributor {
    pub fn new(executor: Arc<FanoutExecutor>, feed: Arc<FeedIndex>, config: &FanoutConfig) -> Self {
        Self {
            executor,
            feed,
            follower_concurrency: config.follower_concurrency.max(1),
        }
    }

    /// 异步把帖子分发给粉丝
    ///
    /// 只提交一个任务就返回；单个粉丝写入失败只记录日志和计数，不影响其他粉丝
    ///
    /// # 参数
    ///
    /// * `post_id` - 帖子ID
    /// * `follower_ids` - 粉丝ID列表
    /// * `published_at` - 发布时间
    #[instrument(skip(self, follower_ids), level = "debug", fields(followers = follower_ids.len()))]
    pub async fn distribute_to_followers(
        &self,
        post_id: i64,
        follower_ids: Vec<i64>,
        published_at: DateTime<Utc>,
    ) -> Result<()> {
        if follower_ids.is_empty() {
            return Ok(());
        }
        let feed = self.feed.clone();
        let concurrency = self.follower_concurrency;

        self.executor
            .submit(async move {
                let total = follower_ids.len();
                let failures = AtomicUsize::new(0);
                stream::iter(follower_ids)
                    .for_each_concurrent(concurrency, |follower_id| {
                        let feed = &feed;
                        let failures = &failures;
                        async move {
                            if let Err(e) = feed.add_entry(follower_id, post_id, published_at).await {
                                warn!(
                                    "Fan-out of post {} to follower {} failed: {}",
                                    post_id, follower_id, e
                                );
                                failures.fetch_add(1, Ordering::Relaxed);
                                GLOBAL_METRICS.record_request("fanout", "add_entry", "error");
                            }
                        }
                    })
                    .await;

                let failed = failures.load(Ordering::Relaxed);
                if failed > 0 {
                    warn!(
                        "Partial fan-out for post {}: {}/{} followers failed",
                        post_id, failed, total
                    );
                } else {
                    debug!("post {} distributed to {} followers", post_id, total);
                }
            })
            .await
    }
}
