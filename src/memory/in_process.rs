//! 进程内记忆后端
//!
//! Redis 不可用时的替代：同样按条数裁剪并维护 TTL，过期记录在读取时视为不存在，
//! `purge_expired` 真正回收。数据不跨进程保留。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::memory::{MemoryBackend, MemoryError, Turn};

struct Entry {
    turns: Vec<Turn>,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// 进程内后端：一把锁保护整张表，单次 append 原子完成
#[derive(Default)]
pub struct InProcessBackend {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InProcessBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryBackend for InProcessBackend {
    async fn append(
        &self,
        key: &str,
        turn: &Turn,
        max_length: usize,
        ttl: Duration,
    ) -> Result<(), MemoryError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            turns: Vec::new(),
            expires_at: now + ttl,
        });
        if entry.is_expired(now) {
            entry.turns.clear();
        }
        entry.turns.push(turn.clone());
        if entry.turns.len() > max_length {
            let excess = entry.turns.len() - max_length;
            entry.turns.drain(..excess);
        }
        entry.expires_at = now + ttl;
        Ok(())
    }

    async fn range(&self, key: &str, limit: Option<usize>) -> Result<Vec<Turn>, MemoryError> {
        let entries = self.entries.lock();
        let turns = match entries.get(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => &entry.turns,
            _ => return Ok(Vec::new()),
        };
        let start = match limit {
            Some(l) => turns.len().saturating_sub(l),
            None => 0,
        };
        Ok(turns[start..].to_vec())
    }

    async fn delete(&self, key: &str) -> Result<bool, MemoryError> {
        Ok(self.entries.lock().remove(key).is_some())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, MemoryError> {
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn purge_expired(&self) -> Result<usize, MemoryError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        Ok(before - entries.len())
    }

    fn name(&self) -> &'static str {
        "in_process"
    }

    fn is_durable(&self) -> bool {
        false
    }
}
