//! 对话记忆存储
//!
//! 每个会话键对应一条有界、带 TTL 的追加式日志。优先使用持久化后端（Redis），
//! 构造时若后端不可达则本进程永久退化为进程内存储，之后不再尝试切换。
//! 构造之后发现的后端故障只记录日志并视为空操作，不会中断对话。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::config::MemorySection;
use crate::core::SessionKey;
use crate::memory::{InProcessBackend, RedisBackend, Role, Turn};

/// 记忆后端错误
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("backend connection failed: {0}")]
    Connection(String),
    #[error("backend command failed: {0}")]
    Command(String),
    #[error("record encoding failed: {0}")]
    Encoding(String),
}

/// 键 → JSON 记录列表 的存储后端：追加、范围读取、裁剪、设置过期、删除、按前缀枚举
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// 追加一条记录，裁剪到最近 `max_length` 条，并刷新 TTL；单次调用内原子完成
    async fn append(
        &self,
        key: &str,
        turn: &Turn,
        max_length: usize,
        ttl: Duration,
    ) -> Result<(), MemoryError>;

    /// 读取记录（时间正序）；`limit` 为最近 N 条
    async fn range(&self, key: &str, limit: Option<usize>) -> Result<Vec<Turn>, MemoryError>;

    /// 删除键，返回是否存在
    async fn delete(&self, key: &str) -> Result<bool, MemoryError>;

    /// 枚举以 `prefix` 开头的存活键（完整键名）
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, MemoryError>;

    /// 清理已过期的记录，返回清理数量；自带过期机制的后端返回 0
    async fn purge_expired(&self) -> Result<usize, MemoryError> {
        Ok(0)
    }

    /// 后端名称（日志与统计）
    fn name(&self) -> &'static str;

    fn is_durable(&self) -> bool;
}

/// 记忆统计
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub backend: &'static str,
    pub using_durable: bool,
    pub active_sessions: usize,
    pub max_memory_length: usize,
    pub memory_ttl_hours: f64,
    pub key_prefix: String,
}

/// 记忆存储：持有唯一的后端实例（持久化或进程内）
pub struct MemoryStore {
    backend: Box<dyn MemoryBackend>,
    key_prefix: String,
    max_length: usize,
    ttl: Duration,
}

impl MemoryStore {
    /// 按配置连接：配置了 redis_url 且能 PING 通则使用 Redis，否则退化为进程内存储
    pub async fn connect(cfg: &MemorySection) -> Self {
        let backend: Box<dyn MemoryBackend> = match cfg.redis_url.as_deref() {
            Some(url) => {
                let timeout = Duration::from_secs(cfg.connect_timeout_secs);
                match RedisBackend::connect(url, timeout).await {
                    Ok(redis) => {
                        tracing::info!(url = %url, "durable memory backend connected");
                        Box::new(redis)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "durable memory backend unreachable, using in-process memory");
                        Box::new(InProcessBackend::new())
                    }
                }
            }
            None => {
                tracing::info!("no durable memory backend configured, using in-process memory");
                Box::new(InProcessBackend::new())
            }
        };
        Self::with_backend(backend, cfg)
    }

    /// 仅进程内存储（测试或无 Redis 部署）
    pub fn in_process(cfg: &MemorySection) -> Self {
        Self::with_backend(Box::new(InProcessBackend::new()), cfg)
    }

    pub fn with_backend(backend: Box<dyn MemoryBackend>, cfg: &MemorySection) -> Self {
        Self {
            backend,
            key_prefix: cfg.key_prefix.clone(),
            max_length: cfg.max_length.max(1),
            ttl: Duration::from_secs(cfg.ttl_secs),
        }
    }

    fn storage_key(&self, key: &SessionKey) -> String {
        format!("{}{}", self.key_prefix, key.storage_id())
    }

    /// 追加一轮；只接受 user / assistant，后端故障时记录日志并返回 false
    pub async fn append(&self, key: &SessionKey, role: Role, content: &str) -> bool {
        if role == Role::System {
            tracing::warn!(session = %key, "system messages are not recorded as turns");
            return false;
        }
        let turn = Turn::new(role, content);
        match self
            .backend
            .append(&self.storage_key(key), &turn, self.max_length, self.ttl)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(session = %key, backend = self.backend.name(), error = %e, "memory append failed");
                false
            }
        }
    }

    /// 读取最近 `limit` 轮（时间正序）；后端故障时返回空
    pub async fn read(&self, key: &SessionKey, limit: Option<usize>) -> Vec<Turn> {
        if limit == Some(0) {
            return Vec::new();
        }
        match self.backend.range(&self.storage_key(key), limit).await {
            Ok(turns) => turns,
            Err(e) => {
                tracing::warn!(session = %key, backend = self.backend.name(), error = %e, "memory read failed");
                Vec::new()
            }
        }
    }

    /// 删除该会话的全部记录
    pub async fn clear(&self, key: &SessionKey) -> bool {
        match self.backend.delete(&self.storage_key(key)).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(session = %key, backend = self.backend.name(), error = %e, "memory clear failed");
                false
            }
        }
    }

    /// 删除某用户名下所有会话的记录（包括当前不在会话表里的历史会话），返回删除键数
    pub async fn clear_user(&self, user: &str) -> usize {
        let prefix = format!("{}{}", self.key_prefix, SessionKey::user_prefix(user));
        let keys = match self.backend.keys(&prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(user = %user, error = %e, "memory key enumeration failed");
                return 0;
            }
        };
        let mut cleared = 0;
        for key in keys {
            match self.backend.delete(&key).await {
                Ok(true) => cleared += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(key = %key, error = %e, "memory delete failed"),
            }
        }
        cleared
    }

    /// 回收已过期记录
    pub async fn purge_expired(&self) -> usize {
        self.backend.purge_expired().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "memory purge failed");
            0
        })
    }

    pub async fn stats(&self) -> MemoryStats {
        let active_sessions = match self.backend.keys(&self.key_prefix).await {
            Ok(keys) => keys.len(),
            Err(e) => {
                tracing::warn!(error = %e, "memory stats unavailable");
                0
            }
        };
        MemoryStats {
            backend: self.backend.name(),
            using_durable: self.backend.is_durable(),
            active_sessions,
            max_memory_length: self.max_length,
            memory_ttl_hours: self.ttl.as_secs_f64() / 3600.0,
            key_prefix: self.key_prefix.clone(),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }
}

/// 会话持有的记忆能力句柄：只有键和存储引用，不复制日志
#[derive(Clone)]
pub struct MemoryHandle {
    key: SessionKey,
    store: Arc<MemoryStore>,
}

impl MemoryHandle {
    pub fn new(key: SessionKey, store: Arc<MemoryStore>) -> Self {
        Self { key, store }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub async fn append(&self, role: Role, content: &str) -> bool {
        self.store.append(&self.key, role, content).await
    }

    pub async fn read(&self, limit: Option<usize>) -> Vec<Turn> {
        self.store.read(&self.key, limit).await
    }

    pub async fn clear(&self) -> bool {
        self.store.clear(&self.key).await
    }
}
