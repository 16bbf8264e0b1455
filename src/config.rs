//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了共享存储、缓存客户端、ID生成器和秒杀管道的配置结构及校验逻辑。

use crate::error::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub config_version: Option<u32>,
    /// 服务名称，用于日志和指标
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub id: IdConfig,
    #[serde(default)]
    pub seckill: SeckillConfig,
}

fn default_service_name() -> String {
    "oxseckill".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: Some(CONFIG_VERSION),
            service_name: default_service_name(),
            store: StoreConfig::default(),
            cache: CacheConfig::default(),
            id: IdConfig::default(),
            seckill: SeckillConfig::default(),
        }
    }
}

/// 共享存储类型
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// 进程内存储，仅适用于单实例和测试
    #[default]
    Memory,
    /// Redis
    Redis,
}

/// 共享存储配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    /// 内存存储的最大条目数
    pub memory_capacity: u64,
    pub redis: RedisConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Memory,
            memory_capacity: 100_000,
            redis: RedisConfig::default(),
        }
    }
}

/// Redis配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis模式
    pub mode: RedisMode,
    /// 连接字符串
    pub connection_string: SecretString,
    /// 连接超时时间（毫秒）
    pub connection_timeout_ms: u64,
    /// 命令执行超时时间（毫秒）
    pub command_timeout_ms: u64,
    /// Redis 密码
    pub password: Option<SecretString>,
    /// 是否启用 TLS
    pub enable_tls: bool,
    /// 哨兵配置
    pub sentinel: Option<SentinelConfig>,
    /// 集群配置
    pub cluster: Option<ClusterConfig>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            mode: RedisMode::Standalone,
            connection_string: SecretString::new("redis://localhost:6379".to_string().into()),
            connection_timeout_ms: 5000,
            command_timeout_ms: 3000,
            password: None,
            enable_tls: false,
            sentinel: None,
            cluster: None,
        }
    }
}

/// 哨兵配置
#[derive(Deserialize, Clone, Debug)]
pub struct SentinelConfig {
    /// 主节点名称
    pub master_name: String,
    /// 哨兵节点列表
    pub nodes: Vec<String>,
}

/// 集群配置
#[derive(Deserialize, Clone, Debug)]
pub struct ClusterConfig {
    /// 初始节点列表
    pub nodes: Vec<String>,
}

/// Redis模式枚举
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RedisMode {
    /// 单机模式
    Standalone,
    /// 哨兵模式
    Sentinel,
    /// 集群模式
    Cluster,
}

/// 缓存客户端配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct CacheConfig {
    /// 空值标记的过期时间（秒）
    pub null_ttl_secs: u64,
    /// 重建锁的过期时间（秒）
    pub lock_ttl_secs: u64,
    /// 互斥重建时未拿到锁的重试间隔（毫秒）
    pub mutex_retry_interval_ms: u64,
    /// 互斥重建的最大尝试次数
    pub mutex_max_attempts: u32,
    /// 逻辑过期重建的工作协程数
    pub rebuild_workers: usize,
    /// 逻辑过期重建任务队列容量
    pub rebuild_queue_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            null_ttl_secs: 120,
            lock_ttl_secs: 10,
            mutex_retry_interval_ms: 50,
            mutex_max_attempts: 100,
            rebuild_workers: 10,
            rebuild_queue_capacity: 1024,
        }
    }
}

impl CacheConfig {
    pub fn null_ttl(&self) -> Duration {
        Duration::from_secs(self.null_ttl_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn mutex_retry_interval(&self) -> Duration {
        Duration::from_millis(self.mutex_retry_interval_ms)
    }
}

/// ID生成器配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct IdConfig {
    /// 纪元起点（Unix秒），默认 2022-01-01T00:00:00Z
    pub epoch_secs: i64,
    /// 低位序列号所占位数
    pub sequence_bits: u32,
}

impl Default for IdConfig {
    fn default() -> Self {
        Self {
            epoch_secs: 1_640_995_200,
            sequence_bits: 32,
        }
    }
}

/// 秒杀管道配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct SeckillConfig {
    /// 订单队列容量
    pub queue_capacity: usize,
    /// 队列已满时生产者的最长等待时间（毫秒）
    pub enqueue_timeout_ms: u64,
    /// 每个买家下单锁的过期时间（秒）
    pub order_lock_ttl_secs: u64,
    /// 订单持久化数据库连接串
    pub database_url: String,
    /// 死信记录保留条数
    pub dead_letter_capacity: usize,
}

impl Default for SeckillConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024 * 1024,
            enqueue_timeout_ms: 500,
            order_lock_ttl_secs: 10,
            database_url: "sqlite::memory:".to_string(),
            dead_letter_capacity: 10_000,
        }
    }
}

impl SeckillConfig {
    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    pub fn order_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.order_lock_ttl_secs)
    }
}

impl Config {
    /// 从TOML字符串解析并校验配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        config.validate().map_err(Error::Config)?;
        Ok(config)
    }

    /// 从TOML文件加载配置
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// 验证配置
    ///
    /// 检查各项取值是否在合理范围内
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(version) = self.config_version {
            if version > CONFIG_VERSION {
                return Err(format!(
                    "Configuration version {} is not supported. Current version is {}.",
                    version, CONFIG_VERSION
                ));
            }
        }

        if self.service_name.is_empty() || self.service_name.len() > 64 {
            return Err("service_name must be between 1 and 64 characters".to_string());
        }

        if self.store.kind == StoreKind::Memory && self.store.memory_capacity == 0 {
            return Err("store.memory_capacity cannot be zero".to_string());
        }

        if self.store.kind == StoreKind::Redis {
            let redis = &self.store.redis;
            if !(100..=30000).contains(&redis.connection_timeout_ms) {
                return Err(
                    "store.redis.connection_timeout_ms must be between 100 and 30000 ms"
                        .to_string(),
                );
            }
            if !(100..=60000).contains(&redis.command_timeout_ms) {
                return Err(
                    "store.redis.command_timeout_ms must be between 100 and 60000 ms".to_string(),
                );
            }
            match redis.mode {
                RedisMode::Cluster if redis.cluster.is_none() => {
                    return Err("store.redis.cluster is required in cluster mode".to_string())
                }
                RedisMode::Sentinel if redis.sentinel.is_none() => {
                    return Err("store.redis.sentinel is required in sentinel mode".to_string())
                }
                _ => {}
            }
        }

        let cache = &self.cache;
        if cache.null_ttl_secs == 0 {
            return Err("cache.null_ttl_secs cannot be zero".to_string());
        }
        if cache.lock_ttl_secs == 0 || cache.lock_ttl_secs > 3600 {
            return Err("cache.lock_ttl_secs must be between 1 and 3600".to_string());
        }
        if cache.mutex_max_attempts == 0 {
            return Err("cache.mutex_max_attempts cannot be zero".to_string());
        }
        if cache.rebuild_workers == 0 || cache.rebuild_workers > 256 {
            return Err("cache.rebuild_workers must be between 1 and 256".to_string());
        }
        if cache.rebuild_queue_capacity == 0 {
            return Err("cache.rebuild_queue_capacity cannot be zero".to_string());
        }

        // 至少为时间戳保留31位（纪元起约68年）
        if !(16..=32).contains(&self.id.sequence_bits) {
            return Err("id.sequence_bits must be between 16 and 32".to_string());
        }
        if self.id.epoch_secs < 0 {
            return Err("id.epoch_secs cannot be negative".to_string());
        }

        let seckill = &self.seckill;
        if seckill.queue_capacity == 0 {
            return Err("seckill.queue_capacity cannot be zero".to_string());
        }
        if seckill.order_lock_ttl_secs == 0 {
            return Err("seckill.order_lock_ttl_secs cannot be zero".to_string());
        }
        if seckill.database_url.is_empty() {
            return Err("seckill.database_url cannot be empty".to_string());
        }
        if seckill.dead_letter_capacity == 0 {
            return Err("seckill.dead_letter_capacity cannot be zero".to_string());
        }

        Ok(())
    }
}
