//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了Feed查询命令的实现。

use super::offline::OfflineSource;
use crate::cli::FeedArgs;
use crate::config::Config;
use crate::manager::FeedManager;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

pub async fn execute(path: &Path, args: &FeedArgs) -> Result<()> {
    let config = Config::from_file(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    let manager = FeedManager::connect(config, Arc::new(OfflineSource), None)
        .await
        .context("Failed to open the cache store")?;

    let posts = manager.get_feed(args.user, args.cursor).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&posts)?);
    } else if posts.is_empty() {
        println!("Feed of user {} is empty.", args.user);
    } else {
        println!("=== Feed of user {} ===\n", args.user);
        for post in &posts {
            let author = post
                .author
                .as_ref()
                .map(|a| a.username.as_str())
                .unwrap_or("?");
            println!(
                "#{} by {} at {}  views={} likes={} comments={}",
                post.id,
                author,
                post.published_at.to_rfc3339(),
                post.views,
                post.likes,
                post.comments.len()
            );
        }
    }
    manager.shutdown().await;
    Ok(())
}
