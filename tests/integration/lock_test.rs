//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 分布式锁集成测试

#[path = "../common/mod.rs"]
mod common;

use common::{memory_store, setup_logging};
use oxseckill::lock::{run_locked, DistributedLock, StoreLock};
use oxseckill::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

/// 测试同一时刻只有一个持有者
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_only_one_holder() {
    setup_logging();
    let store = memory_store();
    let barrier = Arc::new(Barrier::new(16));
    let winners = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let store = store.clone();
        let barrier = barrier.clone();
        let winners = winners.clone();
        handles.push(tokio::spawn(async move {
            let lock = StoreLock::new(store, "order:1");
            barrier.wait().await;
            if lock.try_lock(Duration::from_secs(10)).await.unwrap() {
                winners.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(winners.load(Ordering::SeqCst), 1);
}

/// 测试锁过期后被他人获取，原持有者解锁不会删除他人的锁
#[tokio::test]
async fn test_stale_holder_cannot_release_new_holders_lock() {
    let store = memory_store();
    let first = StoreLock::new(store.clone(), "shop:1");
    let second = StoreLock::new(store.clone(), "shop:1");

    assert!(first.try_lock(Duration::from_millis(100)).await.unwrap());
    assert!(!second.try_lock(Duration::from_secs(10)).await.unwrap());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(second.try_lock(Duration::from_secs(10)).await.unwrap());
    let token = store.get("lock:shop:1").await.unwrap();

    assert!(!first.unlock().await.unwrap());
    assert_eq!(store.get("lock:shop:1").await.unwrap(), token);

    assert!(second.unlock().await.unwrap());
    assert_eq!(store.get("lock:shop:1").await.unwrap(), None);
}

/// 测试锁键被外部删除（模拟过期）后，原持有者解锁是空操作
#[tokio::test]
async fn test_unlock_after_expiry_is_noop() {
    let store = memory_store();
    let lock = StoreLock::new(store.clone(), "job");
    assert!(lock.try_lock(Duration::from_secs(10)).await.unwrap());
    store.delete("lock:job").await.unwrap();

    let other = StoreLock::new(store.clone(), "job");
    assert!(other.try_lock(Duration::from_secs(10)).await.unwrap());
    assert!(!lock.unlock().await.unwrap());
    assert!(store.get("lock:job").await.unwrap().is_some());
}

/// 测试未加锁时解锁返回false
#[tokio::test]
async fn test_unlock_without_lock() {
    let lock = StoreLock::new(memory_store(), "never");
    assert!(!lock.unlock().await.unwrap());
}

/// 测试受保护的任务panic后锁仍被释放
#[tokio::test]
async fn test_run_locked_releases_on_panic() {
    let store = memory_store();
    let lock = Arc::new(StoreLock::new(store.clone(), "panicky"));
    assert!(lock.try_lock(Duration::from_secs(10)).await.unwrap());

    let guarded = lock.clone();
    let joined = tokio::spawn(async move {
        run_locked(guarded.as_ref(), async {
            if true {
                panic!("rebuild exploded");
            }
            Ok::<_, Error>(())
        })
        .await
    })
    .await;

    assert!(joined.unwrap_err().is_panic());
    assert_eq!(store.get("lock:panicky").await.unwrap(), None);
    assert!(!lock.is_held());
}
