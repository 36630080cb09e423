//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块汇总了建立在缓存存储之上的三类缓存：帖子互动、作者信息和Feed索引。

pub mod author;
pub mod feed;
pub mod post;

pub use author::AuthorCache;
pub use feed::FeedIndex;
pub use post::PostCache;
