//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了基于共享存储的分布式互斥锁。
//!
//! 加锁是一次带过期时间的 SET NX，值为本次加锁尝试独有的持有者令牌；
//! 解锁是原子的"比较令牌并删除"，绝不按键直接删除。加锁失败立即返回，
//! 是否重试由调用方决定。

use crate::backend::SharedStore;
use crate::error::Result;
use async_trait::async_trait;
use futures::FutureExt;
use lazy_static::lazy_static;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// 锁键前缀
pub const LOCK_KEY_PREFIX: &str = "lock:";

lazy_static! {
    /// 进程级标识，区分不同实例的持有者令牌
    static ref PROCESS_ID: String = Uuid::new_v4().simple().to_string();
}

static ATTEMPT_SEQ: AtomicU64 = AtomicU64::new(0);

/// 生成一个本进程内唯一、跨进程也唯一的持有者令牌
fn next_owner_token() -> String {
    let seq = ATTEMPT_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}", *PROCESS_ID, seq)
}

/// 分布式锁接口
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// 尝试加锁，`ttl` 到期后锁自动释放。成功返回 true。
    async fn try_lock(&self, ttl: Duration) -> Result<bool>;

    /// 释放锁。只有存储中的令牌仍是本次持有的令牌时才会删除，返回是否删除。
    async fn unlock(&self) -> Result<bool>;
}

/// 基于 [`SharedStore`] 的锁实现
pub struct StoreLock {
    store: Arc<dyn SharedStore>,
    key: String,
    token: Mutex<Option<String>>,
}

impl std::fmt::Debug for StoreLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreLock")
            .field("key", &self.key)
            .field("held", &self.is_held())
            .finish()
    }
}

impl StoreLock {
    /// 创建锁对象，锁键为 `lock:{name}`
    pub fn new(store: Arc<dyn SharedStore>, name: &str) -> Self {
        Self {
            store,
            key: format!("{}{}", LOCK_KEY_PREFIX, name),
            token: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// 本对象是否认为自己持有锁（不检查存储中的实际状态）
    pub fn is_held(&self) -> bool {
        self.current_token().is_some()
    }

    /// 续期：仅当仍是持有者时把过期时间重置为 `ttl`
    ///
    /// 临界区可能超过锁TTL时使用，而不是盲目加大TTL
    #[instrument(skip(self), level = "debug", fields(key = %self.key))]
    pub async fn extend(&self, ttl: Duration) -> Result<bool> {
        let Some(token) = self.current_token() else {
            return Ok(false);
        };
        self.store.extend_if_owner(&self.key, &token, ttl).await
    }

    fn token_slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.token.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current_token(&self) -> Option<String> {
        self.token_slot().clone()
    }

    fn take_token(&self) -> Option<String> {
        self.token_slot().take()
    }
}

#[async_trait]
impl DistributedLock for StoreLock {
    #[instrument(skip(self), level = "debug", fields(key = %self.key))]
    async fn try_lock(&self, ttl: Duration) -> Result<bool> {
        let token = next_owner_token();
        let acquired = self.store.set_nx(&self.key, &token, ttl).await?;
        if acquired {
            self.token_slot().replace(token);
        }
        debug!("try_lock: key={}, acquired={}", self.key, acquired);
        Ok(acquired)
    }

    #[instrument(skip(self), level = "debug", fields(key = %self.key))]
    async fn unlock(&self) -> Result<bool> {
        let Some(token) = self.take_token() else {
            return Ok(false);
        };
        let released = self.store.release_if_owner(&self.key, &token).await?;
        if !released {
            warn!(
                "unlock: key={} no longer owned by this holder, left untouched",
                self.key
            );
        }
        Ok(released)
    }
}

/// 在已持有 `lock` 的前提下执行 `work`，无论成功、失败还是panic都会释放锁
///
/// 释放锁本身失败只记录日志，不覆盖 `work` 的结果。panic 会在释放后继续向上传播。
pub async fn run_locked<L, F, T>(lock: &L, work: F) -> Result<T>
where
    L: DistributedLock + ?Sized,
    F: Future<Output = Result<T>>,
{
    let outcome = AssertUnwindSafe(work).catch_unwind().await;
    if let Err(e) = lock.unlock().await {
        warn!("failed to release lock after guarded work: {}", e);
    }
    match outcome {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}
