//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了基于内存的共享存储实现。
//!
//! 只在单进程内共享，适用于测试和单实例部署。所有命令在同一把异步锁下串行执行，
//! 因此复合操作与单线程的 Redis 一样不可分割。
//!
//! 容量满时的行为与 Redis 的 `noeviction` 策略一致：已有的键永远不会因为容量被挤出，
//! 新键写入先清理过期条目，仍然没有空间则返回错误。锁、库存和已购集合与空值标记
//! 共用同一个存储，淘汰任何一个都会破坏锁和一人一单的保证。

use super::{SharedStore, RESERVE_DUPLICATE, RESERVE_INSUFFICIENT_STOCK, RESERVE_OK};
use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

#[derive(Clone, Debug)]
enum Value {
    Str(String),
    Set(HashSet<String>),
}

#[derive(Clone, Debug)]
struct Slot {
    value: Value,
    expire_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expire_at, Some(at) if now >= at)
    }
}

/// 内存共享存储
pub struct MemoryStore {
    entries: DashMap<String, Slot>,
    capacity: usize,
    command_lock: Mutex<()>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.entries.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl MemoryStore {
    /// 创建新的内存存储
    ///
    /// # 参数
    ///
    /// * `capacity` - 最大条目数，写满后新键的写入返回错误
    pub fn new(capacity: u64) -> Self {
        let capacity = usize::try_from(capacity).unwrap_or(usize::MAX).max(1);
        Self {
            entries: DashMap::new(),
            capacity,
            command_lock: Mutex::new(()),
        }
    }

    /// 当前条目数（可能包含尚未清理的过期条目）
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 读取未过期的槽位，已过期的顺带删除
    fn live_slot(&self, key: &str) -> Option<Slot> {
        let slot = self.entries.get(key).map(|entry| entry.value().clone())?;
        if slot.is_expired(Instant::now()) {
            self.entries.remove(key);
            debug!("MemoryStore: key={} expired, removed", key);
            return None;
        }
        Some(slot)
    }

    fn get_str(&self, key: &str) -> Result<Option<String>> {
        match self.live_slot(key) {
            None => Ok(None),
            Some(Slot {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    /// 确认 `keys` 中尚不存在的键都能写入
    ///
    /// 空间不足时先清理全部过期条目，仍不足则拒绝写入，绝不淘汰存活的键
    fn ensure_room(&self, keys: &[&str]) -> Result<()> {
        let missing = |entries: &DashMap<String, Slot>| {
            keys.iter().filter(|k| !entries.contains_key(**k)).count()
        };
        if self.entries.len() + missing(&self.entries) <= self.capacity {
            return Ok(());
        }

        let now = Instant::now();
        self.entries.retain(|_, slot| !slot.is_expired(now));
        if self.entries.len() + missing(&self.entries) <= self.capacity {
            return Ok(());
        }

        warn!(
            "MemoryStore full: {} entries, capacity {}",
            self.entries.len(),
            self.capacity
        );
        Err(Error::Store(format!(
            "OOM store is full ({} entries), write to '{}' rejected",
            self.capacity,
            keys.join("', '")
        )))
    }

    fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        self.ensure_room(&[key])?;
        let expire_at = ttl.map(|d| Instant::now() + d);
        self.entries
            .insert(key.to_string(), Slot { value, expire_at });
        Ok(())
    }
}

fn wrong_type(key: &str) -> Error {
    Error::Store(format!(
        "WRONGTYPE Operation against key '{}' holding the wrong kind of value",
        key
    ))
}

#[async_trait]
impl SharedStore for MemoryStore {
    #[instrument(skip(self), level = "debug")]
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.command_lock.lock().await;
        self.get_str(key)
    }

    #[instrument(skip(self, value), level = "debug")]
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let _guard = self.command_lock.lock().await;
        self.put(key, Value::Str(value.to_string()), ttl)
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete(&self, key: &str) -> Result<bool> {
        let _guard = self.command_lock.lock().await;
        let existed = self.live_slot(key).is_some();
        self.entries.remove(key);
        Ok(existed)
    }

    #[instrument(skip(self, value), level = "debug")]
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let _guard = self.command_lock.lock().await;
        if self.live_slot(key).is_some() {
            return Ok(false);
        }
        self.put(key, Value::Str(value.to_string()), Some(ttl))?;
        Ok(true)
    }

    #[instrument(skip(self), level = "debug")]
    async fn incr(&self, key: &str) -> Result<i64> {
        let _guard = self.command_lock.lock().await;
        let slot = self.live_slot(key);
        let (current, expire_at) = match slot {
            None => (0, None),
            Some(Slot {
                value: Value::Str(s),
                expire_at,
            }) => {
                let n = s.parse::<i64>().map_err(|_| {
                    Error::Store(format!("ERR value at '{}' is not an integer", key))
                })?;
                (n, expire_at)
            }
            Some(_) => return Err(wrong_type(key)),
        };
        let next = current
            .checked_add(1)
            .ok_or_else(|| Error::Store(format!("ERR increment at '{}' would overflow", key)))?;
        self.ensure_room(&[key])?;
        self.entries.insert(
            key.to_string(),
            Slot {
                value: Value::Str(next.to_string()),
                expire_at,
            },
        );
        Ok(next)
    }

    #[instrument(skip(self, token), level = "debug")]
    async fn release_if_owner(&self, key: &str, token: &str) -> Result<bool> {
        let _guard = self.command_lock.lock().await;
        match self.get_str(key)? {
            Some(current) if current == token => {
                self.entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    #[instrument(skip(self, token), level = "debug")]
    async fn extend_if_owner(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let _guard = self.command_lock.lock().await;
        match self.get_str(key)? {
            Some(current) if current == token => {
                self.put(key, Value::Str(current), Some(ttl))?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn reserve_seckill(
        &self,
        stock_key: &str,
        order_key: &str,
        buyer: &str,
    ) -> Result<i64> {
        let _guard = self.command_lock.lock().await;

        let stock_slot = self.live_slot(stock_key);
        let (stock, stock_expiry) = match stock_slot {
            None => (0, None),
            Some(Slot {
                value: Value::Str(s),
                expire_at,
            }) => (s.parse::<i64>().unwrap_or(0), expire_at),
            Some(_) => return Err(wrong_type(stock_key)),
        };
        if stock <= 0 {
            return Ok(RESERVE_INSUFFICIENT_STOCK);
        }

        let (mut buyers, order_expiry) = match self.live_slot(order_key) {
            None => (HashSet::new(), None),
            Some(Slot {
                value: Value::Set(set),
                expire_at,
            }) => (set, expire_at),
            Some(_) => return Err(wrong_type(order_key)),
        };
        if buyers.contains(buyer) {
            return Ok(RESERVE_DUPLICATE);
        }

        // 两个键要么都写入，要么都不写
        self.ensure_room(&[stock_key, order_key])?;
        buyers.insert(buyer.to_string());
        self.entries.insert(
            stock_key.to_string(),
            Slot {
                value: Value::Str((stock - 1).to_string()),
                expire_at: stock_expiry,
            },
        );
        self.entries.insert(
            order_key.to_string(),
            Slot {
                value: Value::Set(buyers),
                expire_at: order_expiry,
            },
        );
        Ok(RESERVE_OK)
    }

    #[instrument(skip(self), level = "debug")]
    async fn cancel_seckill(
        &self,
        stock_key: &str,
        order_key: &str,
        buyer: &str,
    ) -> Result<bool> {
        let _guard = self.command_lock.lock().await;

        let (mut buyers, order_expiry) = match self.live_slot(order_key) {
            Some(Slot {
                value: Value::Set(set),
                expire_at,
            }) => (set, expire_at),
            Some(_) => return Err(wrong_type(order_key)),
            None => return Ok(false),
        };
        if !buyers.remove(buyer) {
            return Ok(false);
        }

        let (stock, stock_expiry) = match self.live_slot(stock_key) {
            None => (0, None),
            Some(Slot {
                value: Value::Str(s),
                expire_at,
            }) => (s.parse::<i64>().unwrap_or(0), expire_at),
            Some(_) => return Err(wrong_type(stock_key)),
        };
        self.ensure_room(&[stock_key])?;
        self.entries.insert(
            stock_key.to_string(),
            Slot {
                value: Value::Str((stock + 1).to_string()),
                expire_at: stock_expiry,
            },
        );
        self.entries.insert(
            order_key.to_string(),
            Slot {
                value: Value::Set(buyers),
                expire_at: order_expiry,
            },
        );
        Ok(true)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
