//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了CLI命令行接口。

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "feedcache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true, default_value = "feedcache.toml", help = "Path to the TOML configuration file")]
    pub config: PathBuf,

    #[arg(long, global = true, default_value = "info", help = "Log filter used when RUST_LOG is not set")]
    pub log: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(name = "consume", about = "Run the heat consumer against the Redis stream")]
    Consume,

    #[command(name = "feed", about = "Print a user's cached feed")]
    Feed(FeedArgs),

    #[command(name = "check-config", about = "Validate a configuration file")]
    CheckConfig,
}

#[derive(Parser, Debug)]
pub struct FeedArgs {
    #[arg(short, long, help = "User whose feed to print")]
    pub user: i64,

    #[arg(short = 'k', long, help = "Last post id of the previous page")]
    pub cursor: Option<i64>,

    #[arg(short, long, help = "Output in JSON format")]
    pub json: bool,
}

mod check;
mod consume;
mod feed;
mod offline;

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    crate::telemetry::init_tracing("feedcache", &cli.log);

    let result = match &cli.command {
        Commands::Consume => consume::execute(&cli.config).await,
        Commands::Feed(args) => feed::execute(&cli.config, args).await,
        Commands::CheckConfig => check::execute(&cli.config),
    };
    crate::telemetry::shutdown_tracing();
    result
}
