//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了订单队列接口及其有界内存实现。

use super::types::PurchaseIntent;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// 订单队列
///
/// 多个生产者（请求处理任务），单个消费者。实现可以替换为分区队列或持久化队列。
#[async_trait]
pub trait OrderQueue: Send + Sync {
    /// 入队，队列满时最多等待 `timeout`。超时返回 `Ok(false)`
    async fn offer(&self, intent: PurchaseIntent, timeout: Duration) -> Result<bool>;

    /// 出队，队列为空时等待。队列关闭且已取空时返回None
    async fn take(&self) -> Option<PurchaseIntent>;

    /// 非阻塞出队
    fn try_take(&self) -> Option<PurchaseIntent>;

    /// 当前排队数量
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> usize;
}

/// 基于tokio有界通道的订单队列
pub struct BoundedOrderQueue {
    sender: mpsc::Sender<PurchaseIntent>,
    receiver: Mutex<mpsc::Receiver<PurchaseIntent>>,
}

impl std::fmt::Debug for BoundedOrderQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedOrderQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl BoundedOrderQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }
}

#[async_trait]
impl OrderQueue for BoundedOrderQueue {
    async fn offer(&self, intent: PurchaseIntent, timeout: Duration) -> Result<bool> {
        match tokio::time::timeout(timeout, self.sender.send(intent)).await {
            Ok(Ok(())) => Ok(true),
            Ok(Err(_)) => Err(Error::ShuttingDown),
            Err(_) => Ok(false),
        }
    }

    async fn take(&self) -> Option<PurchaseIntent> {
        self.receiver.lock().await.recv().await
    }

    fn try_take(&self) -> Option<PurchaseIntent> {
        let mut receiver = self.receiver.try_lock().ok()?;
        receiver.try_recv().ok()
    }

    fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }
}
