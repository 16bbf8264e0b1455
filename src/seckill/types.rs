//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了秒杀流程中流转的数据类型。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 买家ID
///
/// 由调用方显式传入，流程中不依赖任何隐式的"当前用户"上下文
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BuyerId(pub i64);

impl fmt::Display for BuyerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for BuyerId {
    fn from(id: i64) -> Self {
        BuyerId(id)
    }
}

/// 购买意向
///
/// 资格预占通过后生成，由流程持有直到提交成功或进入死信
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseIntent {
    pub order_id: i64,
    pub voucher_id: i64,
    pub buyer_id: BuyerId,
}

/// 拒绝原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// 库存不足
    InsufficientStock,
    /// 该买家已经购买过
    DuplicatePurchase,
    /// 订单队列已满，预占已撤销
    Busy,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectReason::InsufficientStock => "insufficient_stock",
            RejectReason::DuplicatePurchase => "duplicate",
            RejectReason::Busy => "busy",
        };
        f.write_str(s)
    }
}

/// 秒杀入口的返回结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeckillOutcome {
    /// 已受理，订单将异步落库
    Accepted { order_id: i64 },
    Rejected(RejectReason),
}

impl SeckillOutcome {
    pub fn order_id(&self) -> Option<i64> {
        match self {
            SeckillOutcome::Accepted { order_id } => Some(*order_id),
            SeckillOutcome::Rejected(_) => None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, SeckillOutcome::Accepted { .. })
    }
}

/// 持久化提交结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// 持久化存储中已有该买家对该券的订单
    AlreadyOrdered,
    /// 条件扣减没有命中任何行
    OutOfStock,
}

/// 缓存库存键，花括号是集群哈希标签
pub fn stock_key(voucher_id: i64) -> String {
    format!("seckill:stock:{{{}}}", voucher_id)
}

/// 已购买家集合键，与库存键落在同一个槽
pub fn order_key(voucher_id: i64) -> String {
    format!("seckill:order:{{{}}}", voucher_id)
}
