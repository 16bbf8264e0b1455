//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 旁路缓存客户端集成测试

#[path = "../common/mod.rs"]
mod common;

use async_trait::async_trait;
use common::{fast_cache_config, generate_unique_service_name, memory_store, setup_logging};
use oxseckill::cache::{CacheClient, EntityLoader, LogicalEntry};
use oxseckill::config::CacheConfig;
use oxseckill::metrics::GLOBAL_METRICS;
use oxseckill::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Shop {
    id: i64,
    name: String,
}

/// 记录调用次数的店铺加载器
#[derive(Default)]
struct ShopLoader {
    shops: HashMap<i64, Shop>,
    calls: AtomicUsize,
    delay: Duration,
}

impl ShopLoader {
    fn with(shops: &[(i64, &str)]) -> Self {
        Self {
            shops: shops
                .iter()
                .map(|(id, name)| {
                    (
                        *id,
                        Shop {
                            id: *id,
                            name: name.to_string(),
                        },
                    )
                })
                .collect(),
            ..Default::default()
        }
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntityLoader<i64, Shop> for ShopLoader {
    async fn load(&self, id: i64) -> Result<Option<Shop>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.shops.get(&id).cloned())
    }
}

struct FailingLoader;

#[async_trait]
impl EntityLoader<i64, Shop> for FailingLoader {
    async fn load(&self, _id: i64) -> Result<Option<Shop>> {
        Err(Error::Store("backing store unavailable".to_string()))
    }
}

fn client(config: CacheConfig) -> CacheClient {
    CacheClient::new(&generate_unique_service_name("cache"), memory_store(), config)
}

const TTL: Duration = Duration::from_secs(1800);

/// 测试穿透防护：不存在的ID只回源一次，之后命中空值标记
#[tokio::test]
async fn test_pass_through_caches_absence() {
    setup_logging();
    let client = client(CacheConfig::default());
    let loader = ShopLoader::with(&[(1, "noodles")]);

    for _ in 0..5 {
        let shop: Option<Shop> = client
            .query_with_pass_through("cache:shop:", 404i64, &loader, TTL)
            .await
            .unwrap();
        assert!(shop.is_none());
    }
    assert_eq!(loader.calls(), 1);
    assert_eq!(
        client.store().get("cache:shop:404").await.unwrap().as_deref(),
        Some("")
    );

    let shop = client
        .query_with_pass_through("cache:shop:", 1i64, &loader, TTL)
        .await
        .unwrap();
    assert_eq!(shop.map(|s| s.name), Some("noodles".to_string()));
    let again = client
        .query_with_pass_through("cache:shop:", 1i64, &loader, TTL)
        .await
        .unwrap();
    assert!(again.is_some());
    assert_eq!(loader.calls(), 2);
}

/// 测试空值标记按较短的TTL过期
#[tokio::test]
async fn test_empty_marker_expires() {
    let client = client(CacheConfig {
        null_ttl_secs: 1,
        ..CacheConfig::default()
    });
    let loader = ShopLoader::with(&[]);

    let first: Option<Shop> = client
        .query_with_pass_through("cache:shop:", 9i64, &loader, TTL)
        .await
        .unwrap();
    assert!(first.is_none());
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let _: Option<Shop> = client
        .query_with_pass_through("cache:shop:", 9i64, &loader, TTL)
        .await
        .unwrap();
    assert_eq!(loader.calls(), 2);
}

/// 测试回源失败时错误原样返回且不写缓存
#[tokio::test]
async fn test_loader_error_propagates() {
    let client = client(CacheConfig::default());
    let result: Result<Option<Shop>> = client
        .query_with_pass_through("cache:shop:", 1i64, &FailingLoader, TTL)
        .await;
    assert!(matches!(result, Err(Error::Store(_))));
    assert_eq!(client.store().get("cache:shop:1").await.unwrap(), None);

    let result: Result<Option<Shop>> = client
        .query_with_mutex("cache:shop:", 1i64, &FailingLoader, TTL)
        .await;
    assert!(matches!(result, Err(Error::Store(_))));
    // 锁已释放
    assert_eq!(
        client.store().get("lock:cache:shop:1").await.unwrap(),
        None
    );
}

/// 测试互斥重建：并发的冷读取只触发一次回源
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutex_single_loader_call() {
    setup_logging();
    let client = Arc::new(client(fast_cache_config()));
    let loader = Arc::new(ShopLoader::with(&[(1, "noodles")]).slow(Duration::from_millis(200)));
    let barrier = Arc::new(Barrier::new(20));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let client = client.clone();
        let loader = loader.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            client
                .query_with_mutex("cache:shop:", 1i64, loader.as_ref(), TTL)
                .await
        }));
    }

    for handle in handles {
        let shop: Option<Shop> = handle.await.unwrap().unwrap();
        assert_eq!(shop.unwrap().name, "noodles");
    }
    assert_eq!(loader.calls(), 1);
}

/// 测试互斥重建的计数：每次调用只记一个结果，只有真正回源的那次记为未命中
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutex_outcomes_add_up() {
    let service = generate_unique_service_name("cache_metrics");
    let client = Arc::new(CacheClient::new(&service, memory_store(), fast_cache_config()));
    let loader = Arc::new(ShopLoader::with(&[(1, "noodles")]).slow(Duration::from_millis(100)));
    let barrier = Arc::new(Barrier::new(20));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let client = client.clone();
        let loader = loader.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            client
                .query_with_mutex::<i64, Shop, _>("cache:shop:", 1i64, loader.as_ref(), TTL)
                .await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().unwrap().is_some());
    }

    let count = |result| GLOBAL_METRICS.request_count(&service, "cache", "mutex", result);
    assert_eq!(loader.calls(), 1);
    assert_eq!(count("miss"), 1);
    assert_eq!(count("hit"), 19);
    assert_eq!(count("empty") + count("contended"), 0);
}

/// 测试互斥重建在有限次重试后返回锁竞争错误
#[tokio::test]
async fn test_mutex_gives_up_after_max_attempts() {
    let client = client(CacheConfig {
        mutex_retry_interval_ms: 5,
        mutex_max_attempts: 3,
        ..CacheConfig::default()
    });
    client
        .store()
        .set_nx("lock:cache:shop:1", "other-holder", Duration::from_secs(10))
        .await
        .unwrap();

    let loader = ShopLoader::with(&[(1, "noodles")]);
    let result: Result<Option<Shop>> = client
        .query_with_mutex("cache:shop:", 1i64, &loader, TTL)
        .await;
    match result {
        Err(Error::LockContended { key, attempts }) => {
            assert_eq!(key, "lock:cache:shop:1");
            assert_eq!(attempts, 3);
        }
        other => panic!("expected LockContended, got {:?}", other),
    }
    assert_eq!(loader.calls(), 0);
}

/// 测试逻辑过期：未预热的键不回源
#[tokio::test]
async fn test_logical_expire_miss_does_not_load() {
    let client = client(CacheConfig::default());
    let loader = Arc::new(ShopLoader::with(&[(1, "noodles")]));
    let shop: Option<Shop> = client
        .query_with_logical_expire("cache:shop:", 1i64, loader.clone(), TTL)
        .await
        .unwrap();
    assert!(shop.is_none());
    assert_eq!(loader.calls(), 0);
}

/// 测试逻辑过期：过期后立即返回旧值，并发读取只触发一次后台重建
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_logical_expire_serves_stale_and_rebuilds_once() {
    setup_logging();
    let client = Arc::new(client(CacheConfig::default()));
    let stale = Shop {
        id: 1,
        name: "old noodles".to_string(),
    };
    client
        .set_with_logical_expire("cache:shop:1", &stale, Duration::ZERO)
        .await
        .unwrap();

    let loader = Arc::new(ShopLoader::with(&[(1, "new noodles")]).slow(Duration::from_millis(500)));
    let barrier = Arc::new(Barrier::new(10));
    let mut handles = Vec::new();
    for _ in 0..10 {
        let client = client.clone();
        let loader = loader.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            let started = std::time::Instant::now();
            let shop: Option<Shop> = client
                .query_with_logical_expire("cache:shop:", 1i64, loader, Duration::from_secs(60))
                .await
                .unwrap();
            (shop, started.elapsed())
        }));
    }

    for handle in handles {
        let (shop, elapsed) = handle.await.unwrap();
        assert_eq!(shop.unwrap().name, "old noodles");
        // 读取不等待回源
        assert!(elapsed < Duration::from_millis(400));
    }

    let store = client.store().clone();
    let refreshed = common::eventually(Duration::from_secs(5), || {
        let store = store.clone();
        async move {
            match store.get("cache:shop:1").await.unwrap() {
                Some(raw) => serde_json::from_str::<LogicalEntry<Shop>>(&raw)
                    .map(|e| e.data.name == "new noodles" && !e.is_expired())
                    .unwrap_or(false),
                None => false,
            }
        }
    })
    .await;
    assert!(refreshed);
    assert_eq!(loader.calls(), 1);

    // 重建锁已释放
    assert!(
        common::eventually(Duration::from_secs(1), || {
            let store = store.clone();
            async move { store.get("lock:cache:shop:1").await.unwrap().is_none() }
        })
        .await
    );

    let fresh: Option<Shop> = client
        .query_with_logical_expire("cache:shop:", 1i64, loader.clone(), Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(fresh.unwrap().name, "new noodles");
}

/// 测试重建失败时保留旧值并释放锁
#[tokio::test]
async fn test_logical_expire_rebuild_failure_keeps_stale_value() {
    let client = client(CacheConfig::default());
    let stale = Shop {
        id: 2,
        name: "stale".to_string(),
    };
    client
        .set_with_logical_expire("cache:shop:2", &stale, Duration::ZERO)
        .await
        .unwrap();

    let shop: Option<Shop> = client
        .query_with_logical_expire("cache:shop:", 2i64, Arc::new(FailingLoader), TTL)
        .await
        .unwrap();
    assert_eq!(shop, Some(stale.clone()));

    let store = client.store().clone();
    assert!(
        common::eventually(Duration::from_secs(2), || {
            let store = store.clone();
            async move { store.get("lock:cache:shop:2").await.unwrap().is_none() }
        })
        .await
    );
    let raw = store.get("cache:shop:2").await.unwrap().unwrap();
    let entry: LogicalEntry<Shop> = serde_json::from_str(&raw).unwrap();
    assert_eq!(entry.data, stale);
}

/// 测试写路径：先写持久化存储，再删除缓存
#[tokio::test]
async fn test_update_then_invalidate() {
    let client = client(CacheConfig::default());
    let shop = Shop {
        id: 3,
        name: "before".to_string(),
    };
    client.set("cache:shop:3", &shop, TTL).await.unwrap();

    let written = client
        .update_then_invalidate("cache:shop:3", || async { Ok::<_, Error>(1u64) })
        .await
        .unwrap();
    assert_eq!(written, 1);
    assert_eq!(client.store().get("cache:shop:3").await.unwrap(), None);

    client.set("cache:shop:3", &shop, TTL).await.unwrap();
    let failed: Result<u64> = client
        .update_then_invalidate("cache:shop:3", || async {
            Err::<u64, _>(Error::Validation("shop id required".to_string()))
        })
        .await;
    assert!(failed.is_err());
    assert!(client.store().get("cache:shop:3").await.unwrap().is_some());
}

/// 测试闭包也可以作为加载器
#[tokio::test]
async fn test_closure_loader() {
    let client = client(CacheConfig::default());
    let loader = |id: i64| async move {
        Ok::<_, Error>(Some(Shop {
            id,
            name: format!("shop-{}", id),
        }))
    };
    let shop: Option<Shop> = client
        .query_with_pass_through("cache:shop:", 8i64, &loader, TTL)
        .await
        .unwrap();
    assert_eq!(shop.unwrap().name, "shop-8");
}
