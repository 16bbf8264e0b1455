//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了基于Redis的共享存储实现。
//!
//! 所有复合操作都通过Lua脚本在Redis端原子执行。集群模式下，秒杀库存键和
//! 已购集合键使用相同的哈希标签（`{voucher_id}`），保证脚本涉及的键落在同一个槽。

use super::redis_provider::{DefaultRedisProvider, RedisProvider};
use super::SharedStore;
use crate::config::{RedisConfig, RedisMode};
use crate::error::{Error, Result};
use async_trait::async_trait;
use lazy_static::lazy_static;
use redis::aio::{ConnectionLike, ConnectionManager};
use redis::cluster_async::ClusterConnection;
use redis::{Cmd, Pipeline, RedisFuture, Script, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

lazy_static! {
    static ref RELEASE_SCRIPT: Script = Script::new(
        r#"
        if redis.call('get', KEYS[1]) == ARGV[1] then
            return redis.call('del', KEYS[1])
        end
        return 0
        "#,
    );
    static ref EXTEND_SCRIPT: Script = Script::new(
        r#"
        if redis.call('get', KEYS[1]) == ARGV[1] then
            return redis.call('pexpire', KEYS[1], ARGV[2])
        end
        return 0
        "#,
    );
    static ref RESERVE_SCRIPT: Script = Script::new(
        r#"
        local stock = tonumber(redis.call('get', KEYS[1]))
        if stock == nil or stock <= 0 then
            return 1
        end
        if redis.call('sismember', KEYS[2], ARGV[1]) == 1 then
            return 2
        end
        redis.call('incrby', KEYS[1], -1)
        redis.call('sadd', KEYS[2], ARGV[1])
        return 0
        "#,
    );
    static ref CANCEL_SCRIPT: Script = Script::new(
        r#"
        if redis.call('srem', KEYS[2], ARGV[1]) == 1 then
            redis.call('incrby', KEYS[1], 1)
            return 1
        end
        return 0
        "#,
    );
}

/// Redis共享存储
#[derive(Clone)]
pub enum RedisStore {
    Standalone {
        manager: ConnectionManager,
        command_timeout_ms: u64,
    },
    Cluster {
        client: redis::cluster::ClusterClient,
        command_timeout_ms: u64,
    },
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standalone { .. } => write!(f, "RedisStore::Standalone"),
            Self::Cluster { .. } => write!(f, "RedisStore::Cluster"),
        }
    }
}

/// 单机/哨兵与集群连接的统一封装
enum Connection {
    Single(ConnectionManager),
    Cluster(ClusterConnection),
}

impl ConnectionLike for Connection {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
        match self {
            Connection::Single(c) => c.req_packed_command(cmd),
            Connection::Cluster(c) => c.req_packed_command(cmd),
        }
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        cmd: &'a Pipeline,
        offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        match self {
            Connection::Single(c) => c.req_packed_commands(cmd, offset, count),
            Connection::Cluster(c) => c.req_packed_commands(cmd, offset, count),
        }
    }

    fn get_db(&self) -> i64 {
        match self {
            Connection::Single(c) => c.get_db(),
            Connection::Cluster(c) => c.get_db(),
        }
    }
}

impl RedisStore {
    /// 创建新的Redis存储
    #[instrument(skip(config), level = "info", name = "init_redis_store")]
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        Self::new_with_provider(config, Arc::new(DefaultRedisProvider)).await
    }

    /// 使用指定的连接提供者创建Redis存储
    #[instrument(skip(config, provider), level = "info", fields(mode = ?config.mode))]
    pub async fn new_with_provider(
        config: &RedisConfig,
        provider: Arc<dyn RedisProvider>,
    ) -> Result<Self> {
        debug!("Initializing RedisStore with mode: {:?}", config.mode);
        match config.mode {
            RedisMode::Standalone => {
                let (_client, manager) = provider.get_standalone_client(config).await?;
                Ok(RedisStore::Standalone {
                    manager,
                    command_timeout_ms: config.command_timeout_ms,
                })
            }
            RedisMode::Sentinel => {
                let (_client, manager) = provider.get_sentinel_client(config).await?;
                Ok(RedisStore::Standalone {
                    manager,
                    command_timeout_ms: config.command_timeout_ms,
                })
            }
            RedisMode::Cluster => {
                let client = provider.get_cluster_client(config).await?;
                Ok(RedisStore::Cluster {
                    client,
                    command_timeout_ms: config.command_timeout_ms,
                })
            }
        }
    }

    /// 获取命令超时时间（毫秒）
    pub fn command_timeout_ms(&self) -> u64 {
        match self {
            RedisStore::Standalone {
                command_timeout_ms, ..
            }
            | RedisStore::Cluster {
                command_timeout_ms, ..
            } => *command_timeout_ms,
        }
    }

    async fn connection(&self) -> Result<Connection> {
        match self {
            RedisStore::Standalone { manager, .. } => Ok(Connection::Single(manager.clone())),
            RedisStore::Cluster { client, .. } => {
                Ok(Connection::Cluster(client.get_async_connection().await?))
            }
        }
    }

    /// 为单条命令加上超时限制
    async fn bounded<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        let limit = self.command_timeout_ms();
        match tokio::time::timeout(Duration::from_millis(limit), fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(Error::Timeout(format!(
                "Redis {} timed out after {}ms",
                op, limit
            ))),
        }
    }
}

fn millis(ttl: Duration) -> u64 {
    // PX 不接受 0
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl SharedStore for RedisStore {
    #[instrument(skip(self), level = "debug")]
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        self.bounded(
            "GET",
            redis::cmd("GET").arg(key).query_async::<Option<String>>(&mut conn),
        )
        .await
    }

    #[instrument(skip(self, value), level = "debug")]
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl));
        }
        self.bounded("SET", cmd.query_async::<()>(&mut conn)).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let removed: i64 = self
            .bounded("DEL", redis::cmd("DEL").arg(key).query_async(&mut conn))
            .await?;
        Ok(removed > 0)
    }

    #[instrument(skip(self, value), level = "debug")]
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection().await?;
        let result: Option<String> = self
            .bounded(
                "SET NX",
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("PX")
                    .arg(millis(ttl))
                    .query_async(&mut conn),
            )
            .await?;
        debug!("SET NX result: key={}, acquired={}", key, result.is_some());
        Ok(result.is_some())
    }

    #[instrument(skip(self), level = "debug")]
    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.connection().await?;
        self.bounded("INCR", redis::cmd("INCR").arg(key).query_async(&mut conn))
            .await
    }

    #[instrument(skip(self, token), level = "debug")]
    async fn release_if_owner(&self, key: &str, token: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let mut invocation = RELEASE_SCRIPT.prepare_invoke();
        invocation.key(key).arg(token);
        let deleted: i64 = self
            .bounded("release script", invocation.invoke_async(&mut conn))
            .await?;
        Ok(deleted == 1)
    }

    #[instrument(skip(self, token), level = "debug")]
    async fn extend_if_owner(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection().await?;
        let mut invocation = EXTEND_SCRIPT.prepare_invoke();
        invocation.key(key).arg(token).arg(millis(ttl));
        let extended: i64 = self
            .bounded("extend script", invocation.invoke_async(&mut conn))
            .await?;
        Ok(extended == 1)
    }

    #[instrument(skip(self), level = "debug")]
    async fn reserve_seckill(
        &self,
        stock_key: &str,
        order_key: &str,
        buyer: &str,
    ) -> Result<i64> {
        let mut conn = self.connection().await?;
        let mut invocation = RESERVE_SCRIPT.prepare_invoke();
        invocation.key(stock_key).key(order_key).arg(buyer);
        self.bounded("reserve script", invocation.invoke_async(&mut conn))
            .await
    }

    #[instrument(skip(self), level = "debug")]
    async fn cancel_seckill(
        &self,
        stock_key: &str,
        order_key: &str,
        buyer: &str,
    ) -> Result<bool> {
        let mut conn = self.connection().await?;
        let mut invocation = CANCEL_SCRIPT.prepare_invoke();
        invocation.key(stock_key).key(order_key).arg(buyer);
        let restored: i64 = self
            .bounded("cancel script", invocation.invoke_async(&mut conn))
            .await?;
        Ok(restored == 1)
    }

    #[instrument(skip(self), level = "debug")]
    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let response: String = self
            .bounded("PING", redis::cmd("PING").query_async(&mut conn))
            .await?;
        debug!("RedisStore ping: {}", response);
        Ok(())
    }
}
