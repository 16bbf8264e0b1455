//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块是命令行工具的入口点。

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let result = oxseckill::cli::run().await;
    oxseckill::telemetry::shutdown_tracing();
    result
}
