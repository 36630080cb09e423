//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 热度管道集成测试：生产、消费、重试和去重

#[path = "../common/mod.rs"]
mod common;

use common::{
    memory_store, post, setup_logging, test_config, user, FlakyStore, InMemoryDirectory,
    InMemoryPostSource, RecordingPublisher,
};
use feedcache::backend::CacheStore;
use feedcache::cache::{AuthorCache, FeedIndex, PostCache};
use feedcache::config::HeatConfig;
use feedcache::sync::{HandleOutcome, HeatConsumer, HeatProducer, MemoryChannel};
use feedcache::HeatBundle;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct Caches {
    posts: Arc<PostCache>,
    feed: Arc<FeedIndex>,
    authors: Arc<AuthorCache>,
}

fn caches_on(store: Arc<dyn CacheStore>) -> Caches {
    let config = test_config();
    let posts = Arc::new(PostCache::new(
        store.clone(),
        Arc::new(InMemoryPostSource::default()),
        config.post_cache.clone(),
    ));
    let feed = Arc::new(FeedIndex::new(store.clone(), posts.clone(), config.feed.clone()));
    let authors = Arc::new(AuthorCache::new(store, config.author_cache.clone()));
    Caches {
        posts,
        feed,
        authors,
    }
}

fn heat_config() -> HeatConfig {
    test_config().heat
}

/// 用户1被2、3关注，用户2被3关注
fn social_graph() -> (Arc<InMemoryDirectory>, Arc<InMemoryPostSource>) {
    let directory = Arc::new(InMemoryDirectory::new(vec![
        user(1, vec![2, 3], vec![]),
        user(2, vec![3], vec![1]),
        user(3, vec![], vec![1, 2]),
    ]));
    let source = Arc::new(InMemoryPostSource::new(vec![
        post(10, 1, 10),
        post(11, 1, 5),
        post(20, 2, 7),
    ]));
    (directory, source)
}

#[tokio::test]
async fn test_producer_publishes_one_bundle_per_follower() {
    setup_logging();
    let (directory, source) = social_graph();
    let caches = caches_on(memory_store());
    let publisher = Arc::new(RecordingPublisher::default());
    let producer = HeatProducer::new(
        directory.clone(),
        source.clone(),
        caches.authors.clone(),
        publisher.clone(),
        heat_config(),
    );

    let report = producer.run().await.unwrap();
    assert_eq!(report.users, 3);
    assert_eq!(report.authors_refreshed, 3);
    assert_eq!(report.author_failures, 0);
    assert_eq!(report.bundles_published, 2);
    assert_eq!(report.publish_failures, 0);

    assert_eq!(directory.all_calls(), 1);
    assert_eq!(directory.by_ids_calls(), 0);
    assert_eq!(source.recent_calls(), 3);

    let mut bundles = publisher.bundles();
    bundles.sort_by_key(|b| b.follower_id);
    assert_eq!(bundles[0].follower_id, 2);
    let ids: Vec<i64> = bundles[0].posts.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![10, 11]);
    assert_eq!(bundles[1].follower_id, 3);
    let ids: Vec<i64> = bundles[1].posts.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![10, 20, 11]);

    let authors = caches.authors.get_many(&[1, 2, 3]).await.unwrap();
    assert_eq!(authors.len(), 3);
    assert_eq!(authors[&2].username, "user2");
}

#[tokio::test]
async fn test_publish_failure_is_counted_and_run_continues() {
    setup_logging();
    let (directory, source) = social_graph();
    let caches = caches_on(memory_store());
    let publisher = Arc::new(RecordingPublisher::failing_for(vec![2]));
    let producer = HeatProducer::new(
        directory,
        source,
        caches.authors.clone(),
        publisher.clone(),
        heat_config(),
    );

    let report = producer.run().await.unwrap();
    assert_eq!(report.bundles_published, 1);
    assert_eq!(report.publish_failures, 1);
    assert_eq!(publisher.bundles()[0].follower_id, 3);
}

#[tokio::test]
async fn test_producer_respects_post_limit() {
    setup_logging();
    let directory = Arc::new(InMemoryDirectory::new(vec![
        user(1, vec![2], vec![]),
        user(2, vec![], vec![1]),
    ]));
    let source = Arc::new(InMemoryPostSource::new(
        (0..10).map(|i| post(i, 1, i)).collect(),
    ));
    let caches = caches_on(memory_store());
    let publisher = Arc::new(RecordingPublisher::default());
    let mut config = heat_config();
    config.max_posts_in_heat_feed = 4;
    let producer = HeatProducer::new(directory, source, caches.authors, publisher.clone(), config);

    producer.run().await.unwrap();
    let bundles = publisher.bundles();
    assert_eq!(bundles.len(), 1);
    let ids: Vec<i64> = bundles[0].posts.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![9, 8, 7, 6]);
}

/// 粉丝关系只记录在作者一侧，粉丝自己的关注列表为空
#[tokio::test]
async fn test_bundle_built_from_author_follower_list() {
    setup_logging();
    let directory = Arc::new(InMemoryDirectory::new(vec![
        user(1, vec![2], vec![]),
        user(2, vec![], vec![]),
    ]));
    let source = Arc::new(InMemoryPostSource::new(vec![post(10, 1, 0)]));
    let caches = caches_on(memory_store());
    let publisher = Arc::new(RecordingPublisher::default());
    let producer = HeatProducer::new(
        directory.clone(),
        source,
        caches.authors,
        publisher.clone(),
        heat_config(),
    );

    let report = producer.run().await.unwrap();
    assert_eq!(report.bundles_published, 1);
    let bundles = publisher.bundles();
    assert_eq!(bundles.len(), 1);
    assert_eq!(bundles[0].follower_id, 2);
    let ids: Vec<i64> = bundles[0].posts.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![10]);
    assert_eq!(directory.by_ids_calls(), 0);
}

#[tokio::test]
async fn test_producer_runs_on_spawned_task() {
    setup_logging();
    let (directory, source) = social_graph();
    let caches = caches_on(memory_store());
    let publisher = Arc::new(RecordingPublisher::default());
    let producer = Arc::new(HeatProducer::new(
        directory,
        source,
        caches.authors,
        publisher.clone(),
        heat_config(),
    ));

    let report = tokio::spawn(async move { producer.run().await })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.bundles_published, 2);
    assert_eq!(publisher.bundles().len(), 2);
}

#[tokio::test]
async fn test_consumer_bundle_yields_newest_first_feed() {
    setup_logging();
    let caches = caches_on(memory_store());
    let consumer = HeatConsumer::new(caches.posts.clone(), caches.feed.clone(), &heat_config());

    let bundle = HeatBundle::new(5, vec![post(1, 1, 10), post(2, 1, 20)]);
    assert_eq!(consumer.handle(&bundle).await, HandleOutcome::Applied);

    let ids: Vec<i64> = caches
        .feed
        .get_feed(5, None)
        .await
        .unwrap()
        .iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(ids, vec![2, 1]);
}

#[tokio::test]
async fn test_redelivery_is_idempotent() {
    setup_logging();
    let caches = caches_on(memory_store());
    let consumer = HeatConsumer::new(caches.posts.clone(), caches.feed.clone(), &heat_config());
    let bundle = HeatBundle::new(5, vec![post(1, 1, 10), post(2, 1, 20)]);

    assert_eq!(consumer.handle(&bundle).await, HandleOutcome::Applied);
    assert_eq!(consumer.handle(&bundle).await, HandleOutcome::Duplicate);

    // 去重窗口关闭时重复写入结果相同
    let mut config = heat_config();
    config.dedupe_window = 0;
    let plain = HeatConsumer::new(caches.posts.clone(), caches.feed.clone(), &config);
    assert_eq!(plain.handle(&bundle).await, HandleOutcome::Applied);
    assert_eq!(caches.feed.feed_len(5).await.unwrap(), 2);
    assert_eq!(caches.feed.get_feed_ids(5, None).await.unwrap(), vec![2, 1]);
}

#[tokio::test]
async fn test_bundle_dropped_after_all_attempts_fail() {
    setup_logging();
    let store = Arc::new(FlakyStore::new(usize::MAX));
    let caches = caches_on(store.clone());
    let config = heat_config();
    let consumer = HeatConsumer::new(caches.posts, caches.feed.clone(), &config);

    let bundle = HeatBundle::new(5, vec![post(1, 1, 10)]);
    assert_eq!(consumer.handle(&bundle).await, HandleOutcome::Dropped);
    assert_eq!(store.sorted_add_calls(), 1 + config.max_retries as usize);
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    setup_logging();
    let store = Arc::new(FlakyStore::new(1));
    let caches = caches_on(store.clone());
    let consumer = HeatConsumer::new(caches.posts, caches.feed.clone(), &heat_config());

    let bundle = HeatBundle::new(5, vec![post(1, 1, 10)]);
    assert_eq!(consumer.handle(&bundle).await, HandleOutcome::Applied);
    assert_eq!(store.sorted_add_calls(), 2);
    assert_eq!(caches.feed.get_feed_ids(5, None).await.unwrap(), vec![1]);
}

#[tokio::test]
async fn test_pipeline_over_memory_channel() {
    setup_logging();
    let (directory, source) = social_graph();
    let caches = caches_on(memory_store());
    let (publisher, subscription) = MemoryChannel::open(16);
    let producer = HeatProducer::new(
        directory,
        source,
        caches.authors.clone(),
        Arc::new(publisher.clone()),
        heat_config(),
    );
    let report = producer.run().await.unwrap();
    assert_eq!(report.bundles_published, 2);

    // 无法解析的消息被确认后跳过
    publisher.publish_raw(b"{\"bundle_id\": 1".to_vec()).await.unwrap();
    drop(producer);
    drop(publisher);

    let consumer = HeatConsumer::new(caches.posts.clone(), caches.feed.clone(), &heat_config());
    consumer
        .run(subscription, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(caches.feed.get_feed_ids(3, None).await.unwrap(), vec![10, 20, 11]);
    assert_eq!(caches.feed.get_feed_ids(2, None).await.unwrap(), vec![10, 11]);
    let cached = caches.posts.get(20).await.unwrap().unwrap();
    assert_eq!(cached.author_id, 2);
}

#[tokio::test]
async fn test_consumer_stops_on_cancel() {
    setup_logging();
    let caches = caches_on(memory_store());
    let (_publisher, subscription) = MemoryChannel::open(4);
    let consumer = HeatConsumer::new(caches.posts, caches.feed, &heat_config());
    let token = CancellationToken::new();
    token.cancel();

    tokio::time::timeout(
        std::time::Duration::from_secs(5),
        consumer.run(subscription, token),
    )
    .await
    .expect("consumer should stop once cancelled")
    .unwrap();
}
