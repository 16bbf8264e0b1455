//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存与秒杀核心的错误类型。

use std::time::Duration;
use thiserror::Error;

/// 核心错误类型枚举
///
/// 竞争失败（库存不足、重复下单）不属于错误，它们以类型化的拒绝结果返回，
/// 这里只包含校验失败、锁竞争超限和基础设施故障。
#[derive(Error, Debug)]
pub enum Error {
    /// 输入校验失败，无副作用
    #[error("Validation error: {0}")]
    Validation(String),

    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 共享存储操作失败
    #[error("Store error: {0}")]
    Store(String),

    /// Redis错误
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// 持久化存储错误
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 互斥重建在有限次重试后仍未拿到锁
    #[error("Lock '{key}' still contended after {attempts} attempts")]
    LockContended { key: String, attempts: u32 },

    /// 单日序列号耗尽
    #[error("Id sequence exhausted for '{0}'")]
    IdExhausted(String),

    /// 时间戳超出ID高位可容纳的范围
    #[error("Id timestamp {timestamp}s does not fit above {sequence_bits} sequence bits")]
    IdOverflow { timestamp: i64, sequence_bits: u32 },

    /// 时钟早于纪元起点
    #[error("Clock is {0:?} behind the id epoch")]
    ClockRegressed(Duration),

    /// 管道正在关闭
    #[error("Pipeline is shutting down")]
    ShuttingDown,

    /// IO错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 超时错误
    #[error("Timeout error: {0}")]
    Timeout(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// 操作结果类型别名
pub type Result<T> = std::result::Result<T, Error>;
