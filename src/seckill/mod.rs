//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了秒杀下单流程。
//!
//! 请求路径只做一次共享存储上的原子资格预占，通过后生成订单ID并把购买意向放入
//! 有界队列，立即返回。订单由单个后台消费者在买家锁保护下异步落库。
//!
//! 状态流转：`Submitted → Validated → Queued → Committed | Rejected`

pub mod consumer;
pub mod dead_letter;
pub mod order_store;
pub mod queue;
pub mod types;

use crate::backend::{SharedStore, RESERVE_DUPLICATE, RESERVE_INSUFFICIENT_STOCK, RESERVE_OK};
use crate::config::SeckillConfig;
use crate::error::{Error, Result};
use crate::id::IdGenerator;
use crate::metrics::GLOBAL_METRICS;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub use consumer::OrderConsumer;
pub use dead_letter::{DeadLetter, DeadLetterLog, DeadLetterReason};
pub use order_store::{OrderStore, SqlOrderStore};
pub use queue::{BoundedOrderQueue, OrderQueue};
pub use types::{
    order_key, stock_key, BuyerId, CommitOutcome, PurchaseIntent, RejectReason, SeckillOutcome,
};

/// 订单ID的逻辑键
pub const ORDER_ID_KEY: &str = "order";

/// 秒杀流程
pub struct SeckillPipeline {
    service_name: String,
    store: Arc<dyn SharedStore>,
    ids: IdGenerator,
    queue: Arc<dyn OrderQueue>,
    orders: Arc<dyn OrderStore>,
    dead_letters: Arc<DeadLetterLog>,
    config: SeckillConfig,
    accepting: AtomicBool,
    cancel: CancellationToken,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SeckillPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeckillPipeline")
            .field("service_name", &self.service_name)
            .field("queued", &self.queue.len())
            .field("dead_letters", &self.dead_letters.len())
            .field("accepting", &self.accepting.load(Ordering::Relaxed))
            .finish()
    }
}

impl SeckillPipeline {
    /// 使用有界内存队列创建秒杀流程，并启动消费者。必须在tokio运行时内调用。
    pub fn new(
        service_name: &str,
        store: Arc<dyn SharedStore>,
        ids: IdGenerator,
        orders: Arc<dyn OrderStore>,
        config: SeckillConfig,
    ) -> Self {
        let queue = Arc::new(BoundedOrderQueue::new(config.queue_capacity));
        Self::with_queue(service_name, store, ids, orders, queue, config)
    }

    /// 使用指定的订单队列创建秒杀流程
    pub fn with_queue(
        service_name: &str,
        store: Arc<dyn SharedStore>,
        ids: IdGenerator,
        orders: Arc<dyn OrderStore>,
        queue: Arc<dyn OrderQueue>,
        config: SeckillConfig,
    ) -> Self {
        let dead_letters = Arc::new(DeadLetterLog::new(config.dead_letter_capacity));
        let cancel = CancellationToken::new();

        let consumer = Arc::new(OrderConsumer::new(
            service_name,
            store.clone(),
            queue.clone(),
            orders.clone(),
            dead_letters.clone(),
            config.order_lock_ttl(),
        ));
        let token = cancel.clone();
        let handle = tokio::spawn(async move { consumer.run(token).await });

        info!(
            "SeckillPipeline started for service: {}, queue capacity: {}",
            service_name,
            queue.capacity()
        );
        Self {
            service_name: service_name.to_string(),
            store,
            ids,
            queue,
            orders,
            dead_letters,
            config,
            accepting: AtomicBool::new(true),
            cancel,
            consumer: Mutex::new(Some(handle)),
        }
    }

    pub fn orders(&self) -> &Arc<dyn OrderStore> {
        &self.orders
    }

    pub fn dead_letters(&self) -> &DeadLetterLog {
        &self.dead_letters
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn record(&self, result: &str) {
        GLOBAL_METRICS.record_request(&self.service_name, "seckill", "reserve", result);
    }

    /// 发布秒杀券：写入持久化库存，并预热缓存库存
    #[instrument(skip(self), level = "info")]
    pub async fn publish_voucher(&self, voucher_id: i64, stock: i64) -> Result<()> {
        if voucher_id <= 0 {
            return Err(Error::Validation(format!("invalid voucher id: {}", voucher_id)));
        }
        if stock < 0 {
            return Err(Error::Validation(format!("stock cannot be negative: {}", stock)));
        }
        self.orders.publish_voucher(voucher_id, stock).await?;
        self.store
            .set(&stock_key(voucher_id), &stock.to_string(), None)
            .await?;
        info!("voucher {} published with stock {}", voucher_id, stock);
        Ok(())
    }

    /// 秒杀下单
    ///
    /// 预占通过后返回订单ID，订单随后异步落库。库存不足和重复下单以
    /// [`SeckillOutcome::Rejected`] 返回而不是错误。队列在 `enqueue_timeout_ms`
    /// 内仍满时撤销预占并返回 [`RejectReason::Busy`]。
    #[instrument(skip(self), level = "debug")]
    pub async fn seckill_voucher(&self, voucher_id: i64, buyer: BuyerId) -> Result<SeckillOutcome> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(Error::ShuttingDown);
        }
        if voucher_id <= 0 {
            return Err(Error::Validation(format!("invalid voucher id: {}", voucher_id)));
        }
        if buyer.0 <= 0 {
            return Err(Error::Validation(format!("invalid buyer id: {}", buyer)));
        }

        let stock_key = stock_key(voucher_id);
        let order_key = order_key(voucher_id);
        let status = self
            .store
            .reserve_seckill(&stock_key, &order_key, &buyer.to_string())
            .await?;
        match status {
            RESERVE_OK => {}
            RESERVE_INSUFFICIENT_STOCK => {
                self.record("insufficient_stock");
                return Ok(SeckillOutcome::Rejected(RejectReason::InsufficientStock));
            }
            RESERVE_DUPLICATE => {
                self.record("duplicate");
                return Ok(SeckillOutcome::Rejected(RejectReason::DuplicatePurchase));
            }
            other => {
                return Err(Error::Store(format!(
                    "unexpected reserve status {} for voucher {}",
                    other, voucher_id
                )))
            }
        }

        let order_id = match self.ids.next_id(ORDER_ID_KEY).await {
            Ok(id) => id,
            Err(e) => {
                self.compensate(&stock_key, &order_key, buyer).await;
                return Err(e);
            }
        };

        let intent = PurchaseIntent {
            order_id,
            voucher_id,
            buyer_id: buyer,
        };
        match self.queue.offer(intent, self.config.enqueue_timeout()).await {
            Ok(true) => {
                self.record("accepted");
                debug!(
                    "seckill accepted: voucher_id={}, buyer={}, order_id={}",
                    voucher_id, buyer, order_id
                );
                Ok(SeckillOutcome::Accepted { order_id })
            }
            Ok(false) => {
                warn!(
                    "order queue full, rejecting voucher_id={}, buyer={}",
                    voucher_id, buyer
                );
                self.compensate(&stock_key, &order_key, buyer).await;
                self.record("busy");
                Ok(SeckillOutcome::Rejected(RejectReason::Busy))
            }
            Err(e) => {
                self.compensate(&stock_key, &order_key, buyer).await;
                Err(e)
            }
        }
    }

    /// 撤销预占，失败只记录日志
    async fn compensate(&self, stock_key: &str, order_key: &str, buyer: BuyerId) {
        match self
            .store
            .cancel_seckill(stock_key, order_key, &buyer.to_string())
            .await
        {
            Ok(true) => debug!("reservation rolled back: {} buyer={}", stock_key, buyer),
            Ok(false) => warn!("no reservation to roll back: {} buyer={}", stock_key, buyer),
            Err(e) => warn!(
                "failed to roll back reservation: {} buyer={}: {}",
                stock_key, buyer, e
            ),
        }
    }

    /// 停止受理新请求，处理完队列中剩余的意向后停止消费者
    pub async fn shutdown(&self) -> Result<()> {
        self.accepting.store(false, Ordering::Release);
        self.cancel.cancel();
        let handle = self.consumer.lock().await.take();
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| Error::Store(format!("order consumer task failed: {}", e)))?;
        }
        info!("SeckillPipeline shut down for service: {}", self.service_name);
        Ok(())
    }
}

impl Drop for SeckillPipeline {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
