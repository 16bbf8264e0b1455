//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了订单队列的单消费者。

use super::dead_letter::{DeadLetterLog, DeadLetterReason};
use super::order_store::OrderStore;
use super::queue::OrderQueue;
use super::types::{CommitOutcome, PurchaseIntent};
use crate::backend::SharedStore;
use crate::error::Error;
use crate::lock::{run_locked, DistributedLock, StoreLock};
use crate::metrics::GLOBAL_METRICS;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// 买家锁名前缀，完整锁键为 `lock:order:{buyer}`
const ORDER_LOCK_PREFIX: &str = "order:";

/// 订单消费者
///
/// 从队列取出购买意向，在买家锁保护下提交到持久化存储。
/// 失败的意向不会重试，而是记入死信。
pub struct OrderConsumer {
    service_name: String,
    store: Arc<dyn SharedStore>,
    queue: Arc<dyn OrderQueue>,
    orders: Arc<dyn OrderStore>,
    dead_letters: Arc<DeadLetterLog>,
    lock_ttl: Duration,
}

impl std::fmt::Debug for OrderConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderConsumer")
            .field("service_name", &self.service_name)
            .field("queued", &self.queue.len())
            .field("lock_ttl", &self.lock_ttl)
            .finish()
    }
}

impl OrderConsumer {
    pub fn new(
        service_name: &str,
        store: Arc<dyn SharedStore>,
        queue: Arc<dyn OrderQueue>,
        orders: Arc<dyn OrderStore>,
        dead_letters: Arc<DeadLetterLog>,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            service_name: service_name.to_string(),
            store,
            queue,
            orders,
            dead_letters,
            lock_ttl,
        }
    }

    /// 消费循环，直到 `cancel` 被触发或队列关闭
    ///
    /// 取消后会把队列中剩余的意向处理完再返回
    pub async fn run(&self, cancel: CancellationToken) {
        info!("Order consumer started for service: {}", self.service_name);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = self.queue.take() => match next {
                    Some(intent) => {
                        self.handle(intent).await;
                    }
                    None => break,
                },
            }
        }

        let mut drained = 0usize;
        while let Some(intent) = self.queue.try_take() {
            self.handle(intent).await;
            drained += 1;
        }
        info!(
            "Order consumer stopped for service: {}, drained {} queued orders",
            self.service_name, drained
        );
    }

    /// 处理一个购买意向，提交成功返回true
    #[instrument(skip(self), level = "debug", fields(order_id = intent.order_id))]
    pub async fn handle(&self, intent: PurchaseIntent) -> bool {
        GLOBAL_METRICS.set_gauge(&self.service_name, "order_queue_depth", self.queue.len() as i64);

        let lock = StoreLock::new(
            self.store.clone(),
            &format!("{}{}", ORDER_LOCK_PREFIX, intent.buyer_id),
        );
        match lock.try_lock(self.lock_ttl).await {
            Ok(true) => {}
            Ok(false) => {
                self.drop_intent(intent, DeadLetterReason::LockNotAcquired);
                return false;
            }
            Err(e) => {
                self.drop_intent(intent, DeadLetterReason::CommitFailed(e.to_string()));
                return false;
            }
        }

        let started = std::time::Instant::now();
        // 提交中的panic转成错误，消费者任务不能因为一个意向而退出
        let commit = AssertUnwindSafe(async { self.orders.create_order(&intent).await })
            .catch_unwind()
            .map(|caught| {
                caught.unwrap_or_else(|panic| {
                    Err(Error::Store(format!(
                        "order commit panicked: {}",
                        panic_message(&*panic)
                    )))
                })
            });
        let outcome = run_locked(&lock, commit).await;
        GLOBAL_METRICS.record_duration(
            &self.service_name,
            "order",
            "commit",
            started.elapsed().as_secs_f64(),
        );

        match outcome {
            Ok(CommitOutcome::Committed) => {
                GLOBAL_METRICS.record_request(&self.service_name, "order", "commit", "committed");
                debug!(
                    "order committed: order_id={}, voucher_id={}, buyer={}",
                    intent.order_id, intent.voucher_id, intent.buyer_id
                );
                true
            }
            Ok(CommitOutcome::AlreadyOrdered) => {
                self.drop_intent(intent, DeadLetterReason::AlreadyOrdered);
                false
            }
            Ok(CommitOutcome::OutOfStock) => {
                self.drop_intent(intent, DeadLetterReason::OutOfStock);
                false
            }
            Err(e) => {
                self.drop_intent(intent, DeadLetterReason::CommitFailed(e.to_string()));
                false
            }
        }
    }

    fn drop_intent(&self, intent: PurchaseIntent, reason: DeadLetterReason) {
        GLOBAL_METRICS.record_request(&self.service_name, "order", "commit", "dead_letter");
        self.dead_letters.record(intent, reason);
        GLOBAL_METRICS.set_gauge(
            &self.service_name,
            "dead_letters",
            self.dead_letters.total_recorded() as i64,
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}
