//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! Redis存储和Redis Streams通道集成测试，Redis不可用时跳过

#[path = "../common/mod.rs"]
mod common;

use common::{connect_redis, post, setup_logging, test_config, unique_prefix, InMemoryPostSource};
use feedcache::backend::CacheStore;
use feedcache::cache::{FeedIndex, PostCache};
use feedcache::config::ChannelConfig;
use feedcache::sync::{HeatPublisher, HeatSubscription, RedisStreamPublisher, RedisStreamSubscription};
use feedcache::HeatBundle;
use std::sync::Arc;

macro_rules! redis_or_skip {
    () => {
        match connect_redis().await {
            Some(store) => store,
            None => {
                println!("跳过测试: Redis不可用");
                return;
            }
        }
    };
}

fn channel_config(name: &str) -> ChannelConfig {
    ChannelConfig {
        topic: format!("{}heat", unique_prefix(name)),
        group: "feedcache-test".to_string(),
        consumer: "consumer-1".to_string(),
        block_ms: 200,
        batch_size: 4,
        ..ChannelConfig::default()
    }
}

#[tokio::test]
async fn test_sorted_add_trims_to_max_len() {
    setup_logging();
    let store = redis_or_skip!();
    let key = format!("{}feed", unique_prefix("trim"));

    for i in 0..8i64 {
        let card = store
            .sorted_add(&key, vec![(i.to_string(), i * 1000)], Some(5))
            .await
            .unwrap();
        assert!(card <= 5);
    }

    assert_eq!(store.sorted_card(&key).await.unwrap(), 5);
    assert_eq!(
        store.sorted_rev_range(&key, 0, 9).await.unwrap(),
        vec!["7", "6", "5", "4", "3"]
    );
    assert_eq!(store.sorted_rev_rank(&key, "5").await.unwrap(), Some(2));
    assert_eq!(store.sorted_rev_rank(&key, "0").await.unwrap(), None);
    assert_eq!(store.sorted_score(&key, "6").await.unwrap(), Some(6000));

    // 批量写入也裁剪
    let batch = (10..20i64).map(|i| (i.to_string(), i * 1000)).collect();
    assert_eq!(store.sorted_add(&key, batch, Some(5)).await.unwrap(), 5);
    assert_eq!(
        store.sorted_rev_range(&key, 0, 0).await.unwrap(),
        vec!["19"]
    );

    store.delete(&key).await.unwrap();
    assert_eq!(store.sorted_card(&key).await.unwrap(), 0);
}

#[tokio::test]
async fn test_conditional_hash_writes() {
    setup_logging();
    let store = redis_or_skip!();
    let key = format!("{}post:1", unique_prefix("hash"));

    // 条目不存在时不写入
    assert_eq!(store.hash_incr_if_exists(&key, "views", 1).await.unwrap(), None);
    assert!(!store
        .hash_set_if_exists(&key, "body", b"{}".to_vec())
        .await
        .unwrap());
    assert!(store.hash_get_all_many(&[key.clone()]).await.unwrap()[0].is_none());

    store
        .hash_put(
            &key,
            vec![
                ("views".to_string(), b"10".to_vec()),
                ("likes".to_string(), b"2".to_vec()),
                ("body".to_string(), b"{}".to_vec()),
            ],
            Some(60),
        )
        .await
        .unwrap();

    assert_eq!(
        store.hash_incr_if_exists(&key, "views", 1).await.unwrap(),
        Some(11)
    );
    assert!(store
        .hash_set_if_exists(&key, "body", b"{\"x\":1}".to_vec())
        .await
        .unwrap());

    let fields = store.hash_get_all_many(&[key.clone()]).await.unwrap()[0]
        .clone()
        .unwrap();
    assert_eq!(fields["views"], b"11".to_vec());
    assert_eq!(fields["likes"], b"2".to_vec());
    assert_eq!(fields["body"], b"{\"x\":1}".to_vec());

    store.delete(&key).await.unwrap();
}

#[tokio::test]
async fn test_feed_index_on_redis() {
    setup_logging();
    let store: Arc<dyn CacheStore> = Arc::new(redis_or_skip!());
    let mut config = test_config();
    let prefix = unique_prefix("feed");
    config.feed.key_prefix = format!("{}feed:", prefix);
    config.post_cache.key_prefix = format!("{}post:", prefix);

    let posts = Arc::new(PostCache::new(
        store.clone(),
        Arc::new(InMemoryPostSource::default()),
        config.post_cache.clone(),
    ));
    let feed = FeedIndex::new(store.clone(), posts.clone(), config.feed.clone());

    let bundle = HeatBundle::new(1, (1..=12).map(|id| post(id, 1, id)).collect());
    posts.save_all(&bundle.posts).await.unwrap();
    assert_eq!(feed.bulk_insert(&bundle).await.unwrap(), 10);

    let first: Vec<i64> = feed
        .get_feed(1, None)
        .await
        .unwrap()
        .iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(first, vec![12, 11, 10]);
    assert_eq!(feed.get_feed_ids(1, Some(10)).await.unwrap(), vec![9, 8, 7]);

    posts.increment_likes(12).await.unwrap();
    assert_eq!(posts.get(12).await.unwrap().unwrap().likes, 1);

    store.delete(&format!("{}feed:1", prefix)).await.unwrap();
    for id in 1..=12 {
        store.delete(&format!("{}post:{}", prefix, id)).await.unwrap();
    }
}

#[tokio::test]
async fn test_stream_delivery_and_ack() {
    setup_logging();
    let store = redis_or_skip!();
    let config = channel_config("stream");
    let publisher = RedisStreamPublisher::new(&store, &config);
    let mut subscription = RedisStreamSubscription::connect(&store, &config)
        .await
        .unwrap();

    let bundle = HeatBundle::new(7, vec![post(1, 2, 3)]);
    publisher.publish(&bundle).await.unwrap();

    let delivery = subscription.next().await.unwrap().unwrap();
    assert_eq!(delivery.payload.as_ref().unwrap(), &bundle);
    subscription.ack(&delivery.id).await.unwrap();
    drop(subscription);

    // 已确认的消息不会再次投递
    let mut resumed = RedisStreamSubscription::connect(&store, &config)
        .await
        .unwrap();
    let second = HeatBundle::new(8, vec![]);
    publisher.publish(&second).await.unwrap();
    let delivery = resumed.next().await.unwrap().unwrap();
    assert_eq!(delivery.payload.unwrap().follower_id, 8);

    store.delete(&config.topic).await.unwrap();
}

#[tokio::test]
async fn test_unacked_message_is_redelivered() {
    setup_logging();
    let store = redis_or_skip!();
    let config = channel_config("redeliver");
    let publisher = RedisStreamPublisher::new(&store, &config);
    let mut subscription = RedisStreamSubscription::connect(&store, &config)
        .await
        .unwrap();

    let bundle = HeatBundle::new(3, vec![post(5, 1, 0)]);
    publisher.publish(&bundle).await.unwrap();
    let first = subscription.next().await.unwrap().unwrap();
    // 模拟处理中途退出，没有确认
    drop(subscription);

    let mut restarted = RedisStreamSubscription::connect(&store, &config)
        .await
        .unwrap();
    let again = restarted.next().await.unwrap().unwrap();
    assert_eq!(again.id, first.id);
    assert_eq!(again.payload.unwrap().bundle_id, bundle.bundle_id);
    restarted.ack(&again.id).await.unwrap();

    store.delete(&config.topic).await.unwrap();
}
