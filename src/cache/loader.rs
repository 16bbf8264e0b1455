//! 实体加载器
//!
//! 缓存未命中时由调用方提供的回源函数，从持久化存储按ID加载实体

use crate::error::Result;
use async_trait::async_trait;
use std::future::Future;

/// 实体加载器trait
///
/// 返回 `Ok(None)` 表示持久化存储中确实不存在该实体，这与加载失败（`Err`）不同：
/// 前者会被缓存为空值标记，后者原样返回给调用方。
#[async_trait]
pub trait EntityLoader<I, R>: Send + Sync
where
    I: Send + 'static,
    R: Send + 'static,
{
    /// 根据ID加载实体
    async fn load(&self, id: I) -> Result<Option<R>>;
}

#[async_trait]
impl<I, R, F, Fut> EntityLoader<I, R> for F
where
    I: Send + 'static,
    R: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<R>>> + Send,
{
    async fn load(&self, id: I) -> Result<Option<R>> {
        (self)(id).await
    }
}
