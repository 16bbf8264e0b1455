//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了测试的通用工具函数和设置。

#![allow(dead_code)]

use oxseckill::backend::{MemoryStore, SharedStore};
use oxseckill::config::{CacheConfig, IdConfig, RedisConfig, SeckillConfig};
use oxseckill::seckill::{SeckillPipeline, SqlOrderStore};
use oxseckill::IdGenerator;
use secrecy::SecretString;
use std::sync::{Arc, Once};
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

pub fn setup_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_span_events(FmtSpan::CLOSE)
            .with_env_filter(EnvFilter::new("debug"))
            .try_init()
            .ok();
    });
}

/// 生成唯一的服务名称
///
/// 在基础名称后附加UUID，避免全局指标在测试之间串扰
pub fn generate_unique_service_name(base: &str) -> String {
    format!("{}_{}", base, uuid::Uuid::new_v4().simple())
}

pub fn memory_store() -> Arc<dyn SharedStore> {
    Arc::new(MemoryStore::new(100_000))
}

/// 重试间隔较短的缓存配置，让互斥重建测试跑得快
pub fn fast_cache_config() -> CacheConfig {
    CacheConfig {
        mutex_retry_interval_ms: 10,
        mutex_max_attempts: 500,
        ..CacheConfig::default()
    }
}

/// 基于内存存储和内存SQLite的秒杀流程
pub async fn memory_pipeline(service: &str) -> (Arc<SeckillPipeline>, Arc<dyn SharedStore>) {
    let store = memory_store();
    let orders = SqlOrderStore::connect("sqlite::memory:")
        .await
        .expect("failed to open in-memory sqlite");
    let pipeline = SeckillPipeline::new(
        service,
        store.clone(),
        IdGenerator::new(store.clone(), &IdConfig::default()),
        Arc::new(orders),
        SeckillConfig::default(),
    );
    (Arc::new(pipeline), store)
}

pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

pub fn redis_config() -> RedisConfig {
    RedisConfig {
        connection_string: SecretString::from(redis_url()),
        connection_timeout_ms: 2000,
        command_timeout_ms: 2000,
        ..RedisConfig::default()
    }
}

/// 检查Redis是否可用
pub async fn is_redis_available() -> bool {
    let client = match redis::Client::open(redis_url()) {
        Ok(c) => c,
        Err(_) => return false,
    };
    matches!(
        tokio::time::timeout(
            Duration::from_secs(1),
            client.get_multiplexed_async_connection(),
        )
        .await,
        Ok(Ok(_))
    )
}

/// 轮询直到条件成立或超时
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check().await
}
