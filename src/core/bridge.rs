//! 同步/异步桥接
//!
//! 调用方是同步的拉取式流（逐段迭代），而模型调用、工具调用、Redis 读写都是异步 I/O。
//! 每次跨越边界都经由 `SyncStreamBridge`：为单次调用分配一个独立工作线程，
//! 在其上新建 current-thread 运行时执行任务，通过通道把结果交回调用方；
//! 调用方带截止时间阻塞等待。任何退出路径（成功、失败、超时）运行时都随工作线程结束而销毁，
//! 超时只是放弃等待（分离线程），不会强杀。

use std::future::Future;
use std::pin::Pin;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use futures_util::{Stream, StreamExt};

use crate::core::AgentError;

/// 桥接流中传递的增量文本流
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, AgentError>> + Send>>;

/// 流式桥接时工作线程与调用方之间的缓冲深度
const STREAM_CHANNEL_DEPTH: usize = 64;

/// 同步调用点执行异步任务的桥
#[derive(Debug, Clone)]
pub struct SyncStreamBridge {
    thread_name: String,
}

impl SyncStreamBridge {
    pub fn new() -> Self {
        Self {
            thread_name: "qingluan-bridge".to_string(),
        }
    }

    /// 在隔离的运行时中执行 `fut`，最多等待 `timeout`
    ///
    /// - 成功：返回任务结果
    /// - 任务失败：原样返回任务的错误
    /// - 超时：返回 `AgentError::Timeout`，工作线程被分离
    /// - 工作线程 panic：返回 `AgentError::WorkerPanicked`
    pub fn run<T, F>(&self, fut: F, timeout: Duration) -> Result<T, AgentError>
    where
        F: Future<Output = Result<T, AgentError>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel::<Result<T, AgentError>>(1);
        self.spawn_worker(move |rt| {
            let result = rt.block_on(fut);
            // 调用方已超时离开时发送失败，直接丢弃
            let _ = tx.send(result);
        })?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "bridged call timed out, worker detached");
                Err(AgentError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(AgentError::WorkerPanicked),
        }
    }

    /// 流式桥接：工作线程先等待 `fut` 产出增量流，再逐项转发；调用方得到同步迭代器
    ///
    /// `timeout` 是整个流的硬截止时间；调用方提前丢弃迭代器时，工作线程在下一次发送失败后退出。
    pub fn stream<F>(&self, fut: F, timeout: Duration) -> BridgedStream
    where
        F: Future<Output = Result<DeltaStream, AgentError>> + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel::<Result<String, AgentError>>(STREAM_CHANNEL_DEPTH);
        let spawned = self.spawn_worker(move |rt| {
            rt.block_on(async move {
                let mut deltas = match fut.await {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return;
                    }
                };
                while let Some(item) = deltas.next().await {
                    let failed = item.is_err();
                    if tx.send(item).is_err() || failed {
                        break;
                    }
                }
            });
        });

        match spawned {
            Ok(()) => BridgedStream::new(rx, timeout),
            Err(e) => BridgedStream::failed(e),
        }
    }

    fn spawn_worker<W>(&self, work: W) -> Result<(), AgentError>
    where
        W: FnOnce(&tokio::runtime::Runtime) + Send + 'static,
    {
        std::thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to build bridge runtime");
                        return;
                    }
                };
                work(&rt);
                // 运行时随作用域结束销毁，剩余的后台任务一并取消
                drop(rt);
            })
            .map(|_| ())
            .map_err(|e| AgentError::SessionCorruption(format!("bridge worker spawn failed: {e}")))
    }
}

impl Default for SyncStreamBridge {
    fn default() -> Self {
        Self::new()
    }
}

/// 桥接流的同步端：每次 `next` 最多阻塞到整体截止时间
pub struct BridgedStream {
    rx: Option<Receiver<Result<String, AgentError>>>,
    pending_error: Option<AgentError>,
    deadline: Instant,
    timeout: Duration,
}

impl BridgedStream {
    fn new(rx: Receiver<Result<String, AgentError>>, timeout: Duration) -> Self {
        Self {
            rx: Some(rx),
            pending_error: None,
            deadline: Instant::now() + timeout,
            timeout,
        }
    }

    fn failed(err: AgentError) -> Self {
        Self {
            rx: None,
            pending_error: Some(err),
            deadline: Instant::now(),
            timeout: Duration::ZERO,
        }
    }
}

impl Iterator for BridgedStream {
    type Item = Result<String, AgentError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.pending_error.take() {
            return Some(Err(err));
        }
        let rx = self.rx.as_ref()?;
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(Ok(delta)) => Some(Ok(delta)),
            Ok(Err(e)) => {
                self.rx = None;
                Some(Err(e))
            }
            Err(RecvTimeoutError::Timeout) => {
                self.rx = None;
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "bridged stream timed out");
                Some(Err(AgentError::Timeout(self.timeout)))
            }
            // 发送端正常结束
            Err(RecvTimeoutError::Disconnected) => {
                self.rx = None;
                None
            }
        }
    }
}
