//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! ID生成器集成测试

#[path = "../common/mod.rs"]
mod common;

use chrono::{TimeZone, Utc};
use common::{memory_store, setup_logging};
use oxseckill::config::IdConfig;
use oxseckill::{Error, IdGenerator};
use std::collections::HashSet;
use std::sync::Arc;

/// 测试10000次并发生成的ID互不相同
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_ids_are_distinct() {
    setup_logging();
    let ids = Arc::new(IdGenerator::new(memory_store(), &IdConfig::default()));

    let mut handles = Vec::new();
    for _ in 0..100 {
        let ids = ids.clone();
        handles.push(tokio::spawn(async move {
            let mut out = Vec::with_capacity(100);
            for _ in 0..100 {
                out.push(ids.next_id("order").await.unwrap());
            }
            out
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.await.unwrap() {
            assert!(id > 0);
            assert!(seen.insert(id), "duplicate id {}", id);
        }
    }
    assert_eq!(seen.len(), 10_000);
}

/// 测试共享同一存储的两个生成器不会产生重复ID
#[tokio::test]
async fn test_generators_sharing_a_store_do_not_collide() {
    let store = memory_store();
    let a = IdGenerator::new(store.clone(), &IdConfig::default());
    let b = IdGenerator::new(store, &IdConfig::default());
    let t = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

    let mut seen = HashSet::new();
    for _ in 0..50 {
        assert!(seen.insert(a.next_id_at("order", t).await.unwrap()));
        assert!(seen.insert(b.next_id_at("order", t).await.unwrap()));
    }
}

/// 测试ID随时间递增，不同逻辑键各自计数
#[tokio::test]
async fn test_ids_increase_with_time_and_keys_are_independent() {
    let ids = IdGenerator::new(memory_store(), &IdConfig::default());
    let earlier = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let later = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 1).unwrap();

    let first = ids.next_id_at("order", earlier).await.unwrap();
    let second = ids.next_id_at("order", later).await.unwrap();
    assert!(second > first);

    let other = ids.next_id_at("shop", earlier).await.unwrap();
    assert_eq!(ids.sequence_of(other), 1);
    assert_eq!(ids.sequence_of(second), 2);
}

/// 测试序列号耗尽时返回错误
#[tokio::test]
async fn test_sequence_exhaustion() {
    let store = memory_store();
    let config = IdConfig {
        sequence_bits: 16,
        ..IdConfig::default()
    };
    let ids = IdGenerator::new(store.clone(), &config);
    let t = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    store
        .set("icr:order:2024:06:01", &((1i64 << 16) - 1).to_string(), None)
        .await
        .unwrap();

    assert!(matches!(
        ids.next_id_at("order", t).await,
        Err(Error::IdExhausted(key)) if key == "icr:order:2024:06:01"
    ));
}
