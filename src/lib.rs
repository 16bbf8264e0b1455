//! oxseckill - 缓存一致性与秒杀下单核心
//!
//! 在共享存储（Redis或进程内存储）之上提供：
//!
//! * 带三种未命中策略的旁路缓存客户端（穿透防护、互斥重建、逻辑过期）
//! * 基于持有者令牌的分布式锁
//! * 集群安全的全局唯一ID生成器
//! * 原子资格预占加异步单消费者落库的秒杀下单流程

#![doc(html_root_url = "https://docs.rs/oxseckill/0.1.0")]

pub use serde;
pub use serde::{Deserialize, Serialize};
pub use serde_json;
pub use tokio;

pub mod backend;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod id;
pub mod lock;
pub mod metrics;
pub mod seckill;
pub mod serialization;
pub mod telemetry;

// Re-export commonly used items
pub use backend::{MemoryStore, RedisStore, SharedStore};
pub use cache::{CacheClient, EntityLoader};
pub use config::Config;
pub use error::{Error, Result};
pub use id::IdGenerator;
pub use lock::{DistributedLock, StoreLock};
pub use seckill::{BuyerId, SeckillOutcome, SeckillPipeline};

/// oxseckill 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
