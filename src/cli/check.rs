//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了配置检查命令的实现。

use crate::config::Config;
use anyhow::{Context, Result};
use std::path::Path;

pub fn execute(path: &Path) -> Result<()> {
    let config = Config::from_file(path)
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;

    println!("=== Configuration OK: {} ===\n", path.display());
    println!("Store backend:     {:?}", config.store.backend);
    println!("Max feed size:     {}", config.feed.max_feed_size);
    println!("Page size:         {}", config.feed.page_size);
    println!("Comment limit:     {}", config.post_cache.comment_limit);
    println!(
        "Fan-out pool:      core={}, max={}, queue={}",
        config.fanout.core_pool_size, config.fanout.max_pool_size, config.fanout.queue_capacity
    );
    println!(
        "Heat retries:      {} x {}ms",
        config.heat.max_retries, config.heat.retry_backoff_ms
    );
    match config.heat.refresh_interval_secs {
        Some(secs) => println!("Heat schedule:     every {}s", secs),
        None => println!("Heat schedule:     manual"),
    }
    Ok(())
}
