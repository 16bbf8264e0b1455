//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! Redis共享存储集成测试，Redis不可用时跳过

#[path = "../common/mod.rs"]
mod common;

use common::{generate_unique_service_name, is_redis_available, redis_config, setup_logging};
use oxseckill::backend::{
    RedisStore, SharedStore, RESERVE_DUPLICATE, RESERVE_INSUFFICIENT_STOCK, RESERVE_OK,
};
use oxseckill::seckill::{order_key, stock_key};
use std::time::Duration;

async fn redis_store() -> Option<RedisStore> {
    setup_logging();
    if !is_redis_available().await {
        println!("Skipping test: Redis not available");
        return None;
    }
    Some(RedisStore::new(&redis_config()).await.unwrap())
}

fn unique_key(base: &str) -> String {
    generate_unique_service_name(base)
}

/// 测试基本读写、TTL和删除
#[tokio::test]
async fn test_redis_get_set_delete() {
    let Some(store) = redis_store().await else {
        return;
    };
    let key = unique_key("redis:basic");

    assert_eq!(store.get(&key).await.unwrap(), None);
    store
        .set(&key, "{\"id\":1}", Some(Duration::from_secs(30)))
        .await
        .unwrap();
    assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("{\"id\":1}"));

    assert!(store.delete(&key).await.unwrap());
    assert!(!store.delete(&key).await.unwrap());
    assert_eq!(store.get(&key).await.unwrap(), None);
}

/// 测试空字符串可以正常写入和读出
#[tokio::test]
async fn test_redis_empty_value_round_trip() {
    let Some(store) = redis_store().await else {
        return;
    };
    let key = unique_key("redis:empty");
    store
        .set(&key, "", Some(Duration::from_secs(30)))
        .await
        .unwrap();
    assert_eq!(store.get(&key).await.unwrap().as_deref(), Some(""));
    store.delete(&key).await.unwrap();
}

/// 测试SET NX与持有者校验的释放和续期
#[tokio::test]
async fn test_redis_owner_checked_lock_ops() {
    let Some(store) = redis_store().await else {
        return;
    };
    let key = unique_key("lock:redis");

    assert!(store.set_nx(&key, "owner-a", Duration::from_secs(5)).await.unwrap());
    assert!(!store.set_nx(&key, "owner-b", Duration::from_secs(5)).await.unwrap());

    assert!(!store.release_if_owner(&key, "owner-b").await.unwrap());
    assert!(!store
        .extend_if_owner(&key, "owner-b", Duration::from_secs(5))
        .await
        .unwrap());
    assert!(store
        .extend_if_owner(&key, "owner-a", Duration::from_secs(10))
        .await
        .unwrap());

    assert!(store.release_if_owner(&key, "owner-a").await.unwrap());
    assert_eq!(store.get(&key).await.unwrap(), None);
}

/// 测试计数器自增
#[tokio::test]
async fn test_redis_incr() {
    let Some(store) = redis_store().await else {
        return;
    };
    let key = unique_key("icr:redis");
    assert_eq!(store.incr(&key).await.unwrap(), 1);
    assert_eq!(store.incr(&key).await.unwrap(), 2);
    store.delete(&key).await.unwrap();
}

/// 测试预占脚本的三种返回值以及撤销
#[tokio::test]
async fn test_redis_reserve_and_cancel() {
    let Some(store) = redis_store().await else {
        return;
    };
    let voucher = (uuid::Uuid::new_v4().as_u128() % 1_000_000_000) as i64 + 1;
    let stock = stock_key(voucher);
    let orders = order_key(voucher);
    store.set(&stock, "1", None).await.unwrap();

    assert_eq!(
        store.reserve_seckill(&stock, &orders, "1").await.unwrap(),
        RESERVE_OK
    );
    assert_eq!(store.get(&stock).await.unwrap().as_deref(), Some("0"));
    assert_eq!(
        store.reserve_seckill(&stock, &orders, "2").await.unwrap(),
        RESERVE_INSUFFICIENT_STOCK
    );

    assert!(store.cancel_seckill(&stock, &orders, "1").await.unwrap());
    assert!(!store.cancel_seckill(&stock, &orders, "1").await.unwrap());
    assert_eq!(store.get(&stock).await.unwrap().as_deref(), Some("1"));

    assert_eq!(
        store.reserve_seckill(&stock, &orders, "2").await.unwrap(),
        RESERVE_OK
    );
    store.set(&stock, "5", None).await.unwrap();
    assert_eq!(
        store.reserve_seckill(&stock, &orders, "2").await.unwrap(),
        RESERVE_DUPLICATE
    );

    store.delete(&stock).await.unwrap();
    store.delete(&orders).await.unwrap();
}

/// 测试PING
#[tokio::test]
async fn test_redis_ping() {
    let Some(store) = redis_store().await else {
        return;
    };
    store.ping().await.unwrap();
}
