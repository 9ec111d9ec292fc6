//! Redis 记忆后端
//!
//! 每个会话一个 Redis 列表：RPUSH 追加 JSON 记录，LTRIM 保留最近 N 条，EXPIRE 刷新 TTL，
//! 三条命令放在同一个 MULTI 事务里执行。每次操作新建多路复用连接：
//! 调用发生在桥接出来的临时运行时上，连接不能跨运行时复用。

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::memory::{MemoryBackend, MemoryError, Turn};

pub type Result<T> = std::result::Result<T, MemoryError>;

/// 每轮 SCAN 的建议返回条数
const SCAN_BATCH: usize = 200;

/// 转义 Redis glob 元字符，使前缀按字面匹配
fn escape_glob(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Redis 支撑的持久化后端
pub struct RedisBackend {
    client: redis::Client,
    op_timeout: Duration,
}

impl RedisBackend {
    /// 打开客户端并 PING 一次；不可达时返回错误，由上层决定退化
    pub async fn connect(redis_url: &str, timeout: Duration) -> Result<Self> {
        let client =
            redis::Client::open(redis_url).map_err(|e| MemoryError::Connection(e.to_string()))?;
        let backend = Self {
            client,
            op_timeout: timeout,
        };

        let mut conn = backend.get_connection().await?;
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| MemoryError::Connection(format!("Redis PING failed: {}", e)))?;
        debug!(reply = %pong, "Redis reachable");
        Ok(backend)
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        tokio::time::timeout(self.op_timeout, self.client.get_multiplexed_async_connection())
            .await
            .map_err(|_| MemoryError::Connection("Redis connection timed out".to_string()))?
            .map_err(|e| MemoryError::Connection(format!("Redis connection failed: {}", e)))
    }
}

#[async_trait]
impl MemoryBackend for RedisBackend {
    async fn append(
        &self,
        key: &str,
        turn: &Turn,
        max_length: usize,
        ttl: Duration,
    ) -> Result<()> {
        let json = serde_json::to_string(turn).map_err(|e| MemoryError::Encoding(e.to_string()))?;
        let mut conn = self.get_connection().await?;

        redis::pipe()
            .atomic()
            .cmd("RPUSH")
            .arg(key)
            .arg(&json)
            .ignore()
            .cmd("LTRIM")
            .arg(key)
            .arg(-(max_length as i64))
            .arg(-1)
            .ignore()
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| MemoryError::Command(format!("Redis append failed: {}", e)))?;

        debug!(key = %key, "turn appended to Redis");
        Ok(())
    }

    async fn range(&self, key: &str, limit: Option<usize>) -> Result<Vec<Turn>> {
        let mut conn = self.get_connection().await?;
        let start: i64 = match limit {
            Some(l) => -(l as i64),
            None => 0,
        };

        let raw: Vec<String> = redis::cmd("LRANGE")
            .arg(key)
            .arg(start)
            .arg(-1)
            .query_async(&mut conn)
            .await
            .map_err(|e| MemoryError::Command(format!("Redis LRANGE failed: {}", e)))?;

        // 无法解析的记录跳过
        Ok(raw
            .iter()
            .filter_map(|r| serde_json::from_str::<Turn>(r).ok())
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.get_connection().await?;
        let deleted: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| MemoryError::Command(format!("Redis DEL failed: {}", e)))?;
        Ok(deleted > 0)
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.get_connection().await?;
        let pattern = format!("{}*", escape_glob(prefix));
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| MemoryError::Command(format!("Redis SCAN failed: {}", e)))?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN 可能重复返回同一个键
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    fn name(&self) -> &'static str {
        "redis"
    }

    fn is_durable(&self) -> bool {
        true
    }
}
