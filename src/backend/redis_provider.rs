//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了Redis连接提供者接口和默认实现。

use crate::{
    config::RedisConfig,
    error::{Error, Result},
};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use secrecy::ExposeSecret;
use tokio::time::{timeout, Duration};

/// Redis连接提供者
///
/// 将连接建立过程与存储命令分离，便于在测试中替换
#[async_trait]
pub trait RedisProvider: Send + Sync {
    async fn get_standalone_client(&self, config: &RedisConfig)
        -> Result<(Client, ConnectionManager)>;
    async fn get_cluster_client(&self, config: &RedisConfig)
        -> Result<redis::cluster::ClusterClient>;
    async fn get_sentinel_client(&self, config: &RedisConfig)
        -> Result<(Client, ConnectionManager)>;
}

pub struct DefaultRedisProvider;

#[async_trait]
impl RedisProvider for DefaultRedisProvider {
    async fn get_standalone_client(
        &self,
        config: &RedisConfig,
    ) -> Result<(Client, ConnectionManager)> {
        let raw = config.connection_string.expose_secret();
        let connection_string = if config.enable_tls && !raw.starts_with("rediss://") {
            raw.replace("redis://", "rediss://")
        } else {
            raw.to_string()
        };

        let client = Client::open(connection_string.as_str())?;
        let manager = timeout(
            Duration::from_millis(config.connection_timeout_ms),
            client.get_connection_manager(),
        )
        .await
        .map_err(|_| {
            Error::Store(format!(
                "Connection timed out after {}ms",
                config.connection_timeout_ms
            ))
        })??;
        Ok((client, manager))
    }

    async fn get_cluster_client(
        &self,
        config: &RedisConfig,
    ) -> Result<redis::cluster::ClusterClient> {
        let cluster_config = config
            .cluster
            .as_ref()
            .ok_or_else(|| Error::Config("Cluster configuration is missing".to_string()))?;

        let mut builder = redis::cluster::ClusterClient::builder(cluster_config.nodes.clone());
        if let Some(password) = &config.password {
            builder = builder.password(password.expose_secret().to_string());
        }
        let client = builder.build()?;

        timeout(
            Duration::from_millis(config.connection_timeout_ms),
            client.get_async_connection(),
        )
        .await
        .map_err(|_| {
            Error::Store(format!(
                "Cluster connection timed out after {}ms",
                config.connection_timeout_ms
            ))
        })??;
        Ok(client)
    }

    async fn get_sentinel_client(
        &self,
        config: &RedisConfig,
    ) -> Result<(Client, ConnectionManager)> {
        let sentinel_config = config
            .sentinel
            .as_ref()
            .ok_or_else(|| Error::Config("Sentinel configuration is missing".to_string()))?;

        tracing::info!("Initializing Sentinel client with automatic failover support");

        // redis+sentinel://[:password@]host:port[,host:port]/master_name
        let mut url = "redis+sentinel://".to_string();
        if let Some(password) = &config.password {
            url.push_str(&format!(":{}@", password.expose_secret()));
        }

        let nodes: Vec<String> = sentinel_config
            .nodes
            .iter()
            .map(|n| {
                n.trim_start_matches("redis://")
                    .trim_start_matches("redis+sentinel://")
                    .to_string()
            })
            .collect();
        if nodes.is_empty() {
            return Err(Error::Config("No sentinel nodes provided".to_string()));
        }

        url.push_str(&nodes.join(","));
        url.push('/');
        url.push_str(&sentinel_config.master_name);

        let client = Client::open(url)?;
        let manager = timeout(
            Duration::from_millis(config.connection_timeout_ms),
            client.get_connection_manager(),
        )
        .await
        .map_err(|_| {
            Error::Store(format!(
                "Sentinel connection timed out after {}ms",
                config.connection_timeout_ms
            ))
        })??;

        Ok((client, manager))
    }
}
