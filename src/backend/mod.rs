//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了共享存储接口及其Redis、内存两种实现。
//!
//! 共享存储是所有服务实例都能访问的低延迟键值服务。除了基本的读写之外，
//! 它还需要提供若干"脚本化"复合操作，这些操作在存储端以不可分割的方式执行。

pub mod memory;
pub mod redis_provider;
pub mod redis_store;

use crate::config::{StoreConfig, StoreKind};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// `reserve_seckill` 返回值：预占成功
pub const RESERVE_OK: i64 = 0;
/// `reserve_seckill` 返回值：库存不足
pub const RESERVE_INSUFFICIENT_STOCK: i64 = 1;
/// `reserve_seckill` 返回值：重复下单
pub const RESERVE_DUPLICATE: i64 = 2;

/// 共享存储接口
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// 读取字符串值，键不存在时返回None
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// 写入字符串值，`ttl` 为None表示永不过期
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// 删除键，返回键是否存在
    async fn delete(&self, key: &str) -> Result<bool>;

    /// 仅当键不存在时写入（带过期时间），返回是否写入成功
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// 原子自增，键不存在时从0开始
    async fn incr(&self, key: &str) -> Result<i64>;

    /// 仅当键当前的值等于 `token` 时删除该键（原子比较并删除）
    async fn release_if_owner(&self, key: &str, token: &str) -> Result<bool>;

    /// 仅当键当前的值等于 `token` 时重置其过期时间（原子比较并续期）
    async fn extend_if_owner(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// 秒杀资格预占
    ///
    /// 在一个不可分割的步骤中：检查库存 > 0、检查买家不在已购集合中，
    /// 两者都通过时扣减缓存库存并把买家加入已购集合。
    /// 返回 [`RESERVE_OK`]、[`RESERVE_INSUFFICIENT_STOCK`] 或 [`RESERVE_DUPLICATE`]。
    async fn reserve_seckill(&self, stock_key: &str, order_key: &str, buyer: &str)
        -> Result<i64>;

    /// 撤销一次预占：库存加回、买家移出已购集合。买家不在集合中时不做任何事。
    async fn cancel_seckill(&self, stock_key: &str, order_key: &str, buyer: &str)
        -> Result<bool>;

    /// 检查连接是否正常
    async fn ping(&self) -> Result<()>;
}

/// 根据配置创建共享存储
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn SharedStore>> {
    match config.kind {
        StoreKind::Memory => Ok(Arc::new(MemoryStore::new(config.memory_capacity))),
        StoreKind::Redis => Ok(Arc::new(RedisStore::new(&config.redis).await?)),
    }
}
