//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了ID生成命令的实现。

use super::{CommandContext, NextIdArgs};
use anyhow::{bail, Result};

pub async fn execute(ctx: &CommandContext, args: &NextIdArgs) -> Result<()> {
    if args.count == 0 {
        bail!("--count must be at least 1");
    }
    let ids = ctx.id_generator();
    for _ in 0..args.count {
        let id = ids.next_id(&args.key).await?;
        println!(
            "{}\t{}\t{}",
            id,
            ids.timestamp_of(id).to_rfc3339(),
            ids.sequence_of(id)
        );
    }
    Ok(())
}
