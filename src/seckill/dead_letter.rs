//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了消费端被丢弃的购买意向的记录。

use super::types::PurchaseIntent;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::error;

/// 丢弃原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadLetterReason {
    /// 没拿到买家锁
    LockNotAcquired,
    /// 持久化存储中已有订单
    AlreadyOrdered,
    /// 持久化库存已耗尽
    OutOfStock,
    /// 提交过程中出错
    CommitFailed(String),
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeadLetterReason::LockNotAcquired => f.write_str("lock not acquired"),
            DeadLetterReason::AlreadyOrdered => f.write_str("already ordered"),
            DeadLetterReason::OutOfStock => f.write_str("out of stock"),
            DeadLetterReason::CommitFailed(msg) => write!(f, "commit failed: {}", msg),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub intent: PurchaseIntent,
    pub reason: DeadLetterReason,
    pub at: DateTime<Utc>,
}

/// 死信记录
///
/// 有界环形缓冲区，满了之后丢弃最旧的记录，累计总数单独计数
#[derive(Debug)]
pub struct DeadLetterLog {
    entries: Mutex<VecDeque<DeadLetter>>,
    capacity: usize,
    total: AtomicU64,
}

impl DeadLetterLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            total: AtomicU64::new(0),
        }
    }

    /// 记录一条死信并输出错误日志
    pub fn record(&self, intent: PurchaseIntent, reason: DeadLetterReason) {
        error!(
            "order dropped: order_id={}, voucher_id={}, buyer={}, reason={}",
            intent.order_id, intent.voucher_id, intent.buyer_id, reason
        );
        let letter = DeadLetter {
            intent,
            reason,
            at: Utc::now(),
        };
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(letter);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// 当前保留的记录，按时间先后排列
    pub fn snapshot(&self) -> Vec<DeadLetter> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 累计记录过的死信数，包括已被挤出缓冲区的
    pub fn total_recorded(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}
