//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了旁路缓存客户端。
//!
//! 读取路径提供三种未命中策略：
//!
//! * 穿透防护：持久化存储确认不存在时写入空值标记
//! * 互斥重建：同一时刻只有一个调用方回源，其余调用方有限次重试
//! * 逻辑过期：永远不阻塞，过期时返回旧值并在后台单飞重建

pub mod entry;
pub mod loader;
pub mod rebuild;

use crate::backend::SharedStore;
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::lock::{run_locked, DistributedLock, StoreLock};
use crate::metrics::GLOBAL_METRICS;
use crate::serialization::{JsonSerializer, Serializer};
use futures::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

pub use entry::{LogicalEntry, EMPTY_MARKER};
use entry::Lookup;
pub use loader::EntityLoader;
pub use rebuild::RebuildPool;

/// 旁路缓存客户端
pub struct CacheClient {
    service_name: String,
    store: Arc<dyn SharedStore>,
    config: CacheConfig,
    serializer: JsonSerializer,
    rebuild_pool: RebuildPool,
}

impl std::fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheClient")
            .field("service_name", &self.service_name)
            .field("config", &self.config)
            .field("rebuild_pool", &self.rebuild_pool)
            .finish()
    }
}

fn cache_key<I: Display>(prefix: &str, id: &I) -> Result<String> {
    let key = format!("{}{}", prefix, id);
    if key.is_empty() {
        return Err(Error::Validation("cache key cannot be empty".to_string()));
    }
    Ok(key)
}

impl CacheClient {
    /// 创建缓存客户端并启动重建线程池，必须在tokio运行时内调用
    pub fn new(service_name: &str, store: Arc<dyn SharedStore>, config: CacheConfig) -> Self {
        let rebuild_pool = RebuildPool::new(config.rebuild_workers, config.rebuild_queue_capacity);
        info!("CacheClient created for service: {}", service_name);
        Self {
            service_name: service_name.to_string(),
            store,
            config,
            serializer: JsonSerializer::new(),
            rebuild_pool,
        }
    }

    pub fn store(&self) -> &Arc<dyn SharedStore> {
        &self.store
    }

    pub fn rebuild_pool(&self) -> &RebuildPool {
        &self.rebuild_pool
    }

    fn record(&self, op: &str, result: &str) {
        GLOBAL_METRICS.record_request(&self.service_name, "cache", op, result);
    }

    /// 以TTL模式写入
    #[instrument(skip(self, value), level = "debug")]
    pub async fn set<T: Serialize + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        if key.is_empty() {
            return Err(Error::Validation("cache key cannot be empty".to_string()));
        }
        let payload = self.serializer.serialize(value)?;
        self.store.set(key, &payload, Some(ttl)).await
    }

    /// 以逻辑过期模式写入：存储层不设TTL，过期时间为当前时刻加 `ttl`
    #[instrument(skip(self, value), level = "debug")]
    pub async fn set_with_logical_expire<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        if key.is_empty() {
            return Err(Error::Validation("cache key cannot be empty".to_string()));
        }
        let payload = self.serializer.serialize(&LogicalEntry::new(value, ttl))?;
        self.store.set(key, &payload, None).await
    }

    /// 删除缓存键
    #[instrument(skip(self), level = "debug")]
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.store.delete(key).await
    }

    /// 先写持久化存储，再删除缓存
    ///
    /// 写入失败时缓存保持不变。删除失败会返回错误，调用方需要知道缓存可能仍是旧值。
    #[instrument(skip(self, writer), level = "debug")]
    pub async fn update_then_invalidate<F, Fut, R>(&self, key: &str, writer: F) -> Result<R>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<R>> + Send,
    {
        if key.is_empty() {
            return Err(Error::Validation("cache key cannot be empty".to_string()));
        }
        let written = writer().await?;
        self.store.delete(key).await?;
        debug!("update_then_invalidate: key={} invalidated", key);
        Ok(written)
    }

    /// 读取TTL模式的值，区分有效值、空值标记和不存在
    async fn read_cached<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Option<T>>> {
        let raw = self.store.get(key).await?;
        match Lookup::classify(raw.as_deref()) {
            Lookup::Miss => Ok(None),
            Lookup::Empty => Ok(Some(None)),
            Lookup::Payload(payload) => Ok(Some(Some(self.serializer.deserialize(payload)?))),
        }
    }

    /// 回源并写回：存在时按 `ttl` 缓存，不存在时写入空值标记
    async fn load_and_fill<I, T, L>(
        &self,
        key: &str,
        id: I,
        loader: &L,
        ttl: Duration,
    ) -> Result<Option<T>>
    where
        I: Send + 'static,
        T: Serialize + Send + Sync + 'static,
        L: EntityLoader<I, T> + ?Sized,
    {
        match loader.load(id).await? {
            Some(value) => {
                self.set(key, &value, ttl).await?;
                Ok(Some(value))
            }
            None => {
                self.store
                    .set(key, EMPTY_MARKER, Some(self.config.null_ttl()))
                    .await?;
                debug!("cached empty marker: key={}", key);
                Ok(None)
            }
        }
    }

    /// 带穿透防护的查询
    ///
    /// 命中空值标记时直接返回 `None`，不调用 `loader`
    #[instrument(skip(self, id, loader), level = "debug", fields(key = tracing::field::Empty))]
    pub async fn query_with_pass_through<I, T, L>(
        &self,
        prefix: &str,
        id: I,
        loader: &L,
        ttl: Duration,
    ) -> Result<Option<T>>
    where
        I: Display + Send + 'static,
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        L: EntityLoader<I, T> + ?Sized,
    {
        let key = cache_key(prefix, &id)?;
        tracing::Span::current().record("key", key.as_str());

        match self.read_cached::<T>(&key).await? {
            Some(Some(value)) => {
                self.record("pass_through", "hit");
                return Ok(Some(value));
            }
            Some(None) => {
                self.record("pass_through", "empty");
                return Ok(None);
            }
            None => self.record("pass_through", "miss"),
        }

        self.load_and_fill(&key, id, loader, ttl).await
    }

    /// 互斥重建查询
    ///
    /// 未命中时只有拿到重建锁的调用方回源，拿锁后会再检查一次缓存。
    /// 其余调用方每隔 `mutex_retry_interval_ms` 重试，最多 `mutex_max_attempts` 次，
    /// 仍未拿到结果时返回 [`Error::LockContended`]。
    #[instrument(skip(self, id, loader), level = "debug", fields(key = tracing::field::Empty))]
    pub async fn query_with_mutex<I, T, L>(
        &self,
        prefix: &str,
        id: I,
        loader: &L,
        ttl: Duration,
    ) -> Result<Option<T>>
    where
        I: Display + Send + 'static,
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        L: EntityLoader<I, T> + ?Sized,
    {
        let key = cache_key(prefix, &id)?;
        tracing::Span::current().record("key", key.as_str());
        // 重建锁键为 `lock:{key}`
        let lock = StoreLock::new(self.store.clone(), &key);
        let max_attempts = self.config.mutex_max_attempts;
        let mut id = Some(id);

        for attempt in 1..=max_attempts {
            match self.read_cached::<T>(&key).await? {
                Some(Some(value)) => {
                    self.record("mutex", "hit");
                    return Ok(Some(value));
                }
                Some(None) => {
                    self.record("mutex", "empty");
                    return Ok(None);
                }
                None => {}
            }

            if lock.try_lock(self.config.lock_ttl()).await? {
                return run_locked(&lock, async {
                    // 等锁期间可能已有其他持有者完成重建
                    match self.read_cached::<T>(&key).await? {
                        Some(Some(value)) => {
                            self.record("mutex", "hit");
                            return Ok(Some(value));
                        }
                        Some(None) => {
                            self.record("mutex", "empty");
                            return Ok(None);
                        }
                        None => self.record("mutex", "miss"),
                    }
                    let Some(id) = id.take() else {
                        return Err(Error::Store(format!("rebuild of '{}' ran twice", key)));
                    };
                    self.load_and_fill(&key, id, loader, ttl).await
                })
                .await;
            }

            if attempt < max_attempts {
                debug!(
                    "query_with_mutex: key={} locked by another caller, attempt {}/{}",
                    key, attempt, max_attempts
                );
                tokio::time::sleep(self.config.mutex_retry_interval()).await;
            }
        }

        warn!(
            "query_with_mutex: key={} still contended after {} attempts",
            key, max_attempts
        );
        self.record("mutex", "contended");
        Err(Error::LockContended {
            key: lock.key().to_string(),
            attempts: max_attempts,
        })
    }

    /// 逻辑过期查询
    ///
    /// 键不存在时返回 `None` 且不回源（逻辑过期的键需要预热）。未过期时返回值；
    /// 已过期时立即返回旧值，并在拿到重建锁的情况下向重建线程池提交一次重建。
    #[instrument(skip(self, id, loader), level = "debug", fields(key = tracing::field::Empty))]
    pub async fn query_with_logical_expire<I, T, L>(
        &self,
        prefix: &str,
        id: I,
        loader: Arc<L>,
        ttl: Duration,
    ) -> Result<Option<T>>
    where
        I: Display + Send + 'static,
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        L: EntityLoader<I, T> + ?Sized + 'static,
    {
        let key = cache_key(prefix, &id)?;
        tracing::Span::current().record("key", key.as_str());

        let raw = self.store.get(&key).await?;
        let payload = match Lookup::classify(raw.as_deref()) {
            Lookup::Payload(payload) => payload,
            Lookup::Miss | Lookup::Empty => {
                self.record("logical_expire", "miss");
                return Ok(None);
            }
        };
        let entry: LogicalEntry<T> = self.serializer.deserialize(payload)?;
        if !entry.is_expired() {
            self.record("logical_expire", "hit");
            return Ok(Some(entry.data));
        }

        self.record("logical_expire", "stale");
        let lock = Arc::new(StoreLock::new(self.store.clone(), &key));
        if lock.try_lock(self.config.lock_ttl()).await? {
            let job = rebuild_job(
                self.store.clone(),
                self.serializer.clone(),
                lock.clone(),
                key.clone(),
                id,
                loader,
                ttl,
            );
            match self.rebuild_pool.submit(job) {
                Ok(()) => self.record("logical_expire", "rebuild"),
                Err(e) => {
                    warn!("query_with_logical_expire: key={} rebuild not scheduled: {}", key, e);
                    if let Err(e) = lock.unlock().await {
                        warn!("failed to release rebuild lock for {}: {}", key, e);
                    }
                }
            }
        } else {
            debug!("query_with_logical_expire: key={} rebuild already in progress", key);
        }

        Ok(Some(entry.data))
    }
}

/// 构造一次逻辑过期重建任务
///
/// 任务在锁保护下运行并在结束时释放锁。回源失败或实体已不存在时保留旧值。
fn rebuild_job<I, T, L>(
    store: Arc<dyn SharedStore>,
    serializer: JsonSerializer,
    lock: Arc<StoreLock>,
    key: String,
    id: I,
    loader: Arc<L>,
    ttl: Duration,
) -> rebuild::RebuildJob
where
    I: Send + 'static,
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
    L: EntityLoader<I, T> + ?Sized + 'static,
{
    async move {
        let outcome = run_locked(lock.as_ref(), async {
            // 拿锁与提交之间可能已有其他实例完成重建
            if let Some(raw) = store.get(&key).await? {
                if let Ok(current) = serializer.deserialize::<LogicalEntry<T>>(&raw) {
                    if !current.is_expired() {
                        debug!("rebuild skipped: key={} already fresh", key);
                        return Ok(());
                    }
                }
            }

            match loader.load(id).await? {
                Some(value) => {
                    let payload = serializer.serialize(&LogicalEntry::new(value, ttl))?;
                    store.set(&key, &payload, None).await?;
                    debug!("rebuild finished: key={}", key);
                }
                None => warn!("rebuild: key={} no longer exists upstream, keeping stale value", key),
            }
            Ok(())
        })
        .await;

        if let Err(e) = outcome {
            warn!("rebuild failed: key={}, error={}", key, e);
        }
    }
    .boxed()
}
