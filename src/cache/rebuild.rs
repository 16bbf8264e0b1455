//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了逻辑过期缓存的后台重建线程池。
//!
//! 固定数量的工作任务共享一个有界任务队列。提交是非阻塞的：队列满时立即返回错误，
//! 读取路径永远不会因为重建而等待。

use crate::error::{Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// 重建任务
pub type RebuildJob = BoxFuture<'static, ()>;

/// 重建线程池
pub struct RebuildPool {
    sender: mpsc::Sender<RebuildJob>,
    workers: Vec<JoinHandle<()>>,
    capacity: usize,
}

impl std::fmt::Debug for RebuildPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebuildPool")
            .field("workers", &self.workers.len())
            .field("capacity", &self.capacity)
            .field("pending", &self.pending())
            .finish()
    }
}

impl RebuildPool {
    /// 创建重建线程池，必须在tokio运行时内调用
    ///
    /// # 参数
    ///
    /// * `workers` - 工作任务数量
    /// * `capacity` - 任务队列容量
    pub fn new(workers: usize, capacity: usize) -> Self {
        let workers = workers.max(1);
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel::<RebuildJob>(capacity);
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..workers)
            .map(|worker_id| {
                let receiver = receiver.clone();
                tokio::spawn(async move {
                    loop {
                        let job = {
                            let mut rx = receiver.lock().await;
                            rx.recv().await
                        };
                        let Some(job) = job else {
                            debug!("rebuild worker {} stopping", worker_id);
                            break;
                        };
                        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                            error!("rebuild worker {}: job panicked", worker_id);
                        }
                    }
                })
            })
            .collect();

        info!(
            "Rebuild pool started: workers={}, capacity={}",
            workers, capacity
        );
        Self {
            sender,
            workers: handles,
            capacity,
        }
    }

    /// 提交重建任务，队列已满或线程池已关闭时返回错误
    pub fn submit(&self, job: RebuildJob) -> Result<()> {
        match self.sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::Store(format!(
                "rebuild queue full (capacity {})",
                self.capacity
            ))),
            Err(TrySendError::Closed(_)) => {
                Err(Error::Store("rebuild pool is closed".to_string()))
            }
        }
    }

    /// 队列中等待执行的任务数
    pub fn pending(&self) -> usize {
        self.capacity - self.sender.capacity()
    }
}

impl Drop for RebuildPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}
