//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了基于共享存储的全局唯一ID生成器。
//!
//! ID为64位有符号整数：最高位恒为0，中间是自纪元起的秒数，低 `sequence_bits` 位是
//! 按 "逻辑键 + 日期" 划分的自增序列号。序列号由共享存储的单次原子自增产生，
//! 因此所有共享同一存储的实例生成的ID互不重复，且大致按时间递增（不保证连续）。

use crate::backend::SharedStore;
use crate::config::IdConfig;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// 序列号计数器键前缀
pub const ID_COUNTER_PREFIX: &str = "icr:";

/// 分布式ID生成器
#[derive(Clone)]
pub struct IdGenerator {
    store: Arc<dyn SharedStore>,
    epoch_secs: i64,
    sequence_bits: u32,
}

impl std::fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdGenerator")
            .field("epoch_secs", &self.epoch_secs)
            .field("sequence_bits", &self.sequence_bits)
            .finish()
    }
}

impl IdGenerator {
    pub fn new(store: Arc<dyn SharedStore>, config: &IdConfig) -> Self {
        Self {
            store,
            epoch_secs: config.epoch_secs,
            sequence_bits: config.sequence_bits,
        }
    }

    /// 为 `logical_key` 生成下一个ID
    #[instrument(skip(self), level = "debug")]
    pub async fn next_id(&self, logical_key: &str) -> Result<i64> {
        self.next_id_at(logical_key, Utc::now()).await
    }

    /// 以给定时刻生成ID
    pub async fn next_id_at(&self, logical_key: &str, now: DateTime<Utc>) -> Result<i64> {
        if logical_key.is_empty() {
            return Err(Error::Validation("id logical key cannot be empty".to_string()));
        }

        let timestamp = now.timestamp() - self.epoch_secs;
        if timestamp < 0 {
            return Err(Error::ClockRegressed(Duration::from_secs(
                timestamp.unsigned_abs(),
            )));
        }

        // 符号位恒为0，时间戳只能占用剩下的 63 - sequence_bits 位
        if self.sequence_bits >= 63 || timestamp >= 1i64 << (63 - self.sequence_bits) {
            return Err(Error::IdOverflow {
                timestamp,
                sequence_bits: self.sequence_bits,
            });
        }

        let counter_key = counter_key(logical_key, now);
        let sequence = self.store.incr(&counter_key).await?;
        let max_sequence = (1i64 << self.sequence_bits) - 1;
        if sequence > max_sequence {
            return Err(Error::IdExhausted(counter_key));
        }

        let id = (timestamp << self.sequence_bits) | sequence;
        debug!("next_id: key={}, timestamp={}, sequence={}", logical_key, timestamp, sequence);
        Ok(id)
    }

    /// 解析ID中的时间部分
    pub fn timestamp_of(&self, id: i64) -> DateTime<Utc> {
        let secs = (id >> self.sequence_bits) + self.epoch_secs;
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default()
    }

    /// 解析ID中的序列号部分
    pub fn sequence_of(&self, id: i64) -> i64 {
        id & ((1i64 << self.sequence_bits) - 1)
    }
}

/// 计数器键：`icr:{logical_key}:{yyyy:MM:dd}`，按天自然重置
pub fn counter_key(logical_key: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}{}:{}",
        ID_COUNTER_PREFIX,
        logical_key,
        now.format("%Y:%m:%d")
    )
}
