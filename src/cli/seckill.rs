//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了秒杀发布与下单命令的实现。

use super::{BuyArgs, CommandContext, PublishArgs};
use crate::seckill::{BuyerId, OrderStore, SeckillOutcome, SeckillPipeline, SqlOrderStore};
use anyhow::{Context as _, Result};
use std::sync::Arc;

async fn pipeline(ctx: &CommandContext) -> Result<SeckillPipeline> {
    let orders = SqlOrderStore::connect(&ctx.config.seckill.database_url)
        .await
        .context("failed to open the order database")?;
    Ok(SeckillPipeline::new(
        &ctx.config.service_name,
        ctx.store.clone(),
        ctx.id_generator(),
        Arc::new(orders),
        ctx.config.seckill.clone(),
    ))
}

pub async fn publish(ctx: &CommandContext, args: &PublishArgs) -> Result<()> {
    let pipeline = pipeline(ctx).await?;
    pipeline.publish_voucher(args.voucher, args.stock).await?;
    pipeline.shutdown().await?;
    println!("voucher {} published with stock {}", args.voucher, args.stock);
    Ok(())
}

pub async fn buy(ctx: &CommandContext, args: &BuyArgs) -> Result<()> {
    let pipeline = pipeline(ctx).await?;
    if let Some(stock) = args.stock {
        pipeline.publish_voucher(args.voucher, stock).await?;
    }

    for &buyer in &args.buyers {
        match pipeline.seckill_voucher(args.voucher, BuyerId(buyer)).await? {
            SeckillOutcome::Accepted { order_id } => {
                println!("buyer {}: accepted, order {}", buyer, order_id)
            }
            SeckillOutcome::Rejected(reason) => println!("buyer {}: rejected ({})", buyer, reason),
        }
    }

    // 等待消费者把队列中的订单落库
    pipeline.shutdown().await?;

    let committed = pipeline.orders().order_count(args.voucher).await?;
    let remaining = pipeline.orders().stock(args.voucher).await?;
    println!(
        "voucher {}: {} orders committed, durable stock {}",
        args.voucher,
        committed,
        remaining.map_or_else(|| "unknown".to_string(), |s| s.to_string())
    );
    for letter in pipeline.dead_letters().snapshot() {
        println!(
            "dead letter: order {} buyer {} ({})",
            letter.intent.order_id, letter.intent.buyer_id, letter.reason
        );
    }
    Ok(())
}
