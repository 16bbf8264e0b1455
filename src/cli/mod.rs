//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了CLI命令行接口。

use crate::backend::{self, SharedStore};
use crate::config::Config;
use crate::id::IdGenerator;
use crate::metrics::get_metrics_string;
use crate::telemetry::init_tracing;
use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

mod id;
mod seckill;

#[derive(Parser, Debug)]
#[command(name = "oxseckill")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true, help = "Path to a TOML configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Log filter, e.g. \"oxseckill=debug\"")]
    pub log: Option<String>,

    #[arg(long, global = true, help = "Print collected metrics before exiting")]
    pub metrics: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(name = "next-id", about = "Generate ids from the shared store")]
    NextId(NextIdArgs),

    #[command(name = "publish", about = "Publish a seckill voucher with its stock")]
    Publish(PublishArgs),

    #[command(name = "buy", about = "Run seckill purchases for one or more buyers")]
    Buy(BuyArgs),

    #[command(name = "ping", about = "Check the shared store connection")]
    Ping,
}

#[derive(Parser, Debug)]
pub struct NextIdArgs {
    #[arg(help = "Logical key, e.g. \"order\"")]
    pub key: String,

    #[arg(short = 'n', long, default_value_t = 1, help = "Number of ids to generate")]
    pub count: usize,
}

#[derive(Parser, Debug)]
pub struct PublishArgs {
    pub voucher: i64,
    pub stock: i64,
}

#[derive(Parser, Debug)]
pub struct BuyArgs {
    pub voucher: i64,

    #[arg(required = true, num_args = 1.., help = "Buyer ids")]
    pub buyers: Vec<i64>,

    #[arg(short, long, help = "Publish the voucher with this stock before buying")]
    pub stock: Option<i64>,
}

/// 命令执行所需的共享组件
pub(crate) struct CommandContext {
    pub config: Config,
    pub store: Arc<dyn SharedStore>,
}

impl CommandContext {
    async fn build(config: Config) -> Result<Self> {
        let store = backend::connect(&config.store)
            .await
            .context("failed to connect to the shared store")?;
        Ok(Self { config, store })
    }

    pub fn id_generator(&self) -> IdGenerator {
        IdGenerator::new(self.store.clone(), &self.config.id)
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(Config::default()),
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    init_tracing(&config.service_name, cli.log.as_deref());

    let ctx = CommandContext::build(config).await?;
    match &cli.command {
        Commands::NextId(args) => id::execute(&ctx, args).await?,
        Commands::Publish(args) => seckill::publish(&ctx, args).await?,
        Commands::Buy(args) => seckill::buy(&ctx, args).await?,
        Commands::Ping => {
            ctx.store.ping().await.context("shared store ping failed")?;
            println!("PONG");
        }
    }

    if cli.metrics {
        print!("{}", get_metrics_string());
    }
    Ok(())
}
