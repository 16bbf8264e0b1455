//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存条目在共享存储中的表示。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 空值标记
///
/// 持久化存储确认不存在时写入，配合较短的TTL，防止缓存穿透
pub const EMPTY_MARKER: &str = "";

/// 逻辑过期条目
///
/// 在共享存储中不设置TTL，过期时间嵌在值里，过期后仍可读出旧值
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogicalEntry<T> {
    pub data: T,
    pub expire_time: DateTime<Utc>,
}

impl<T> LogicalEntry<T> {
    /// 以当前时刻加 `ttl` 作为逻辑过期时间
    pub fn new(data: T, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        let expire_time = Utc::now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self { data, expire_time }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expire_time <= now
    }
}

/// 对共享存储中读出的原始值的分类
#[derive(Debug, PartialEq)]
pub(crate) enum Lookup<'a> {
    /// 键不存在
    Miss,
    /// 空值标记
    Empty,
    /// 有效载荷
    Payload(&'a str),
}

impl<'a> Lookup<'a> {
    pub(crate) fn classify(raw: Option<&'a str>) -> Self {
        match raw {
            None => Lookup::Miss,
            Some(EMPTY_MARKER) => Lookup::Empty,
            Some(payload) => Lookup::Payload(payload),
        }
    }
}
