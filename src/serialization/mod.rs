//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存值在共享存储中的编码方式。

pub mod json;

use crate::error::Result;
use serde::{de::DeserializeOwned, Serialize};

pub use json::JsonSerializer;

/// 序列化器特征
///
/// 共享存储只保存字符串，因此编码结果是文本
pub trait Serializer: Send + Sync {
    /// 序列化值为字符串
    fn serialize<T: Serialize>(&self, value: &T) -> Result<String>;

    /// 从字符串反序列化值
    fn deserialize<T: DeserializeOwned>(&self, data: &str) -> Result<T>;
}
