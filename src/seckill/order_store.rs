//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了订单的持久化存储接口及其基于sea-orm的SQL实现。
//!
//! 提交订单时，重复检查、条件扣减库存和插入订单在同一个本地事务中完成，
//! 任何一步不满足条件都会回滚。

use super::types::{BuyerId, CommitOutcome, PurchaseIntent};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, Statement,
    TransactionTrait, Value,
};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// 订单持久化存储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// 发布（或重置）一张秒杀券的持久化库存
    async fn publish_voucher(&self, voucher_id: i64, stock: i64) -> Result<()>;

    /// 在一个事务内提交订单：重复检查、`stock > 0` 条件扣减、插入订单
    async fn create_order(&self, intent: &PurchaseIntent) -> Result<CommitOutcome>;

    /// 该买家是否已有该券的订单
    async fn order_exists(&self, buyer: BuyerId, voucher_id: i64) -> Result<bool>;

    /// 某张券的订单总数
    async fn order_count(&self, voucher_id: i64) -> Result<u64>;

    /// 某张券的持久化库存，券不存在时返回None
    async fn stock(&self, voucher_id: i64) -> Result<Option<i64>>;
}

/// 基于sea-orm的订单存储，支持SQLite、MySQL和PostgreSQL
#[derive(Debug, Clone)]
pub struct SqlOrderStore {
    connection: DatabaseConnection,
}

impl SqlOrderStore {
    /// 连接数据库并建表
    #[instrument(skip(database_url), level = "info")]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let mut opt = ConnectOptions::new(database_url.to_string());
        opt.connect_timeout(Duration::from_secs(30))
            .sqlx_logging(false);
        if database_url.starts_with("sqlite") {
            // 内存SQLite的每个连接都是独立的数据库
            opt.max_connections(1).min_connections(1);
        }

        let connection = Database::connect(opt).await?;
        let store = Self::from_connection(connection).await?;
        info!("SqlOrderStore connected: backend={:?}", store.backend());
        Ok(store)
    }

    /// 使用已有连接并建表
    pub async fn from_connection(connection: DatabaseConnection) -> Result<Self> {
        let store = Self { connection };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn backend(&self) -> DatabaseBackend {
        self.connection.get_database_backend()
    }

    async fn ensure_schema(&self) -> Result<()> {
        let backend = self.backend();
        self.connection
            .execute(Statement::from_string(
                backend,
                "CREATE TABLE IF NOT EXISTS tb_seckill_voucher (
                    voucher_id BIGINT PRIMARY KEY,
                    stock BIGINT NOT NULL
                )"
                .to_string(),
            ))
            .await?;
        self.connection
            .execute(Statement::from_string(
                backend,
                "CREATE TABLE IF NOT EXISTS tb_voucher_order (
                    id BIGINT PRIMARY KEY,
                    user_id BIGINT NOT NULL,
                    voucher_id BIGINT NOT NULL,
                    create_time BIGINT NOT NULL,
                    UNIQUE (user_id, voucher_id)
                )"
                .to_string(),
            ))
            .await?;
        debug!("order schema ready");
        Ok(())
    }

    fn statement<I>(&self, sql: &str, values: I) -> Statement
    where
        I: IntoIterator<Item = Value>,
    {
        let backend = self.backend();
        Statement::from_sql_and_values(backend, bind_placeholders(backend, sql), values)
    }

    async fn count_orders<C: ConnectionTrait>(
        conn: &C,
        stmt: Statement,
    ) -> Result<i64> {
        let row = conn
            .query_one(stmt)
            .await?
            .ok_or_else(|| Error::Store("COUNT returned no row".to_string()))?;
        Ok(row.try_get::<i64>("", "cnt")?)
    }
}

/// PostgreSQL使用 `$n` 占位符，其余后端使用 `?`
fn bind_placeholders(backend: DatabaseBackend, sql: &str) -> String {
    if backend != DatabaseBackend::Postgres {
        return sql.to_string();
    }
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0;
    for c in sql.chars() {
        if c == '?' {
            n += 1;
            out.push('$');
            out.push_str(&n.to_string());
        } else {
            out.push(c);
        }
    }
    out
}

#[async_trait]
impl OrderStore for SqlOrderStore {
    #[instrument(skip(self), level = "debug")]
    async fn publish_voucher(&self, voucher_id: i64, stock: i64) -> Result<()> {
        let sql = match self.backend() {
            DatabaseBackend::MySql => {
                "INSERT INTO tb_seckill_voucher (voucher_id, stock) VALUES (?, ?) \
                 ON DUPLICATE KEY UPDATE stock = VALUES(stock)"
            }
            _ => {
                "INSERT INTO tb_seckill_voucher (voucher_id, stock) VALUES (?, ?) \
                 ON CONFLICT (voucher_id) DO UPDATE SET stock = excluded.stock"
            }
        };
        self.connection
            .execute(self.statement(sql, [voucher_id.into(), stock.into()]))
            .await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(order_id = intent.order_id))]
    async fn create_order(&self, intent: &PurchaseIntent) -> Result<CommitOutcome> {
        let txn = self.connection.begin().await?;

        let existing = Self::count_orders(
            &txn,
            self.statement(
                "SELECT COUNT(*) AS cnt FROM tb_voucher_order WHERE user_id = ? AND voucher_id = ?",
                [intent.buyer_id.0.into(), intent.voucher_id.into()],
            ),
        )
        .await?;
        if existing > 0 {
            txn.rollback().await?;
            return Ok(CommitOutcome::AlreadyOrdered);
        }

        let updated = txn
            .execute(self.statement(
                "UPDATE tb_seckill_voucher SET stock = stock - 1 WHERE voucher_id = ? AND stock > 0",
                [intent.voucher_id.into()],
            ))
            .await?;
        if updated.rows_affected() == 0 {
            txn.rollback().await?;
            return Ok(CommitOutcome::OutOfStock);
        }

        txn.execute(self.statement(
            "INSERT INTO tb_voucher_order (id, user_id, voucher_id, create_time) VALUES (?, ?, ?, ?)",
            [
                intent.order_id.into(),
                intent.buyer_id.0.into(),
                intent.voucher_id.into(),
                Utc::now().timestamp_millis().into(),
            ],
        ))
        .await?;
        txn.commit().await?;
        Ok(CommitOutcome::Committed)
    }

    async fn order_exists(&self, buyer: BuyerId, voucher_id: i64) -> Result<bool> {
        let count = Self::count_orders(
            &self.connection,
            self.statement(
                "SELECT COUNT(*) AS cnt FROM tb_voucher_order WHERE user_id = ? AND voucher_id = ?",
                [buyer.0.into(), voucher_id.into()],
            ),
        )
        .await?;
        Ok(count > 0)
    }

    async fn order_count(&self, voucher_id: i64) -> Result<u64> {
        let count = Self::count_orders(
            &self.connection,
            self.statement(
                "SELECT COUNT(*) AS cnt FROM tb_voucher_order WHERE voucher_id = ?",
                [voucher_id.into()],
            ),
        )
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn stock(&self, voucher_id: i64) -> Result<Option<i64>> {
        let row = self
            .connection
            .query_one(self.statement(
                "SELECT stock FROM tb_seckill_voucher WHERE voucher_id = ?",
                [voucher_id.into()],
            ))
            .await?;
        match row {
            Some(row) => Ok(Some(row.try_get::<i64>("", "stock")?)),
            None => Ok(None),
        }
    }
}
