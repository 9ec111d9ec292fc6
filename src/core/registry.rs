//! 会话表
//!
//! (user, conversation) → Session。首次访问某个键时构造智能体组合（可能触发工具服务加载，
//! 这是唯一的慢路径），之后 O(1) 查表。构造在按键划分的临界区内进行：全局表锁只用于取出槽位，
//! 同一键的并发调用在槽位锁上排队，不同键互不阻塞。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::core::{AgentError, SyncStreamBridge};
use crate::llm::LlmClient;
use crate::memory::{MemoryHandle, MemoryStore};
use crate::react::prompts::COLLECTOR_SYSTEM_PROMPT;
use crate::react::ToolAgent;
use crate::tools::{ToolConnection, ToolList};

/// 会话键：用户 + 对话
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub user: String,
    pub conversation: String,
}

impl SessionKey {
    pub fn new(user: impl Into<String>, conversation: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            conversation: conversation.into(),
        }
    }

    /// 记忆存储使用的编码：两部分各自转义 `%` 与 `:` 后以 `:` 相连，不同的键编码必不相同
    pub fn storage_id(&self) -> String {
        format!("{}:{}", escape_part(&self.user), escape_part(&self.conversation))
    }

    /// 该用户（且仅该用户）所有会话的 `storage_id` 共享的前缀
    pub fn user_prefix(user: &str) -> String {
        format!("{}:", escape_part(user))
    }
}

fn escape_part(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for c in part.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            c => out.push(c),
        }
    }
    out
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user, self.conversation)
    }
}

/// 每个会话的智能体组合：共享模型、共享工具列表、收集智能体
#[derive(Clone)]
pub struct AgentBundle {
    pub llm: Arc<dyn LlmClient>,
    pub tools: ToolList,
    pub collector: Arc<ToolAgent>,
}

/// 会话：智能体组合 + 记忆句柄
pub struct Session {
    pub key: SessionKey,
    pub bundle: AgentBundle,
    pub memory: MemoryHandle,
    last_used: Mutex<Instant>,
}

impl Session {
    pub fn new(key: SessionKey, bundle: AgentBundle, memory: MemoryHandle) -> Self {
        let now = Instant::now();
        Self {
            key,
            bundle,
            memory,
            last_used: Mutex::new(now),
        }
    }

    pub fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used.lock().elapsed()
    }
}

/// 构造智能体组合（同步，可阻塞）
pub trait BundleFactory: Send + Sync {
    fn build(&self, key: &SessionKey) -> Result<AgentBundle, AgentError>;
}

/// 默认工厂：经桥接加载共享工具列表，绑定收集智能体
pub struct DefaultBundleFactory {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolConnection>,
    bridge: SyncStreamBridge,
    call_timeout: Duration,
    max_steps: usize,
}

impl DefaultBundleFactory {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolConnection>,
        bridge: SyncStreamBridge,
        call_timeout: Duration,
        max_steps: usize,
    ) -> Self {
        Self {
            llm,
            tools,
            bridge,
            call_timeout,
            max_steps,
        }
    }
}

impl BundleFactory for DefaultBundleFactory {
    fn build(&self, key: &SessionKey) -> Result<AgentBundle, AgentError> {
        let conn = self.tools.clone();
        // 握手与 tools/list 各自受 handshake_timeout 约束
        let deadline = conn.handshake_timeout() * 2 + Duration::from_secs(5);
        let tools = self
            .bridge
            .run(async move { Ok::<_, AgentError>(conn.load_tools().await) }, deadline)
            .unwrap_or_else(|e| {
                warn!(session = %key, error = %e, "tool loading did not finish, session runs without tools");
                ToolList::from(Vec::new())
            });

        let collector = ToolAgent::new(
            self.llm.clone(),
            &tools,
            COLLECTOR_SYSTEM_PROMPT,
            self.call_timeout,
            self.max_steps,
        );
        Ok(AgentBundle {
            llm: self.llm.clone(),
            tools,
            collector: Arc::new(collector),
        })
    }
}

type Slot = Arc<Mutex<Option<Arc<Session>>>>;

/// 线程安全的会话表
pub struct SessionRegistry {
    factory: Arc<dyn BundleFactory>,
    memory: Arc<MemoryStore>,
    bridge: SyncStreamBridge,
    memory_timeout: Duration,
    slots: Mutex<HashMap<SessionKey, Slot>>,
}

impl SessionRegistry {
    pub fn new(
        factory: Arc<dyn BundleFactory>,
        memory: Arc<MemoryStore>,
        bridge: SyncStreamBridge,
        memory_timeout: Duration,
    ) -> Self {
        Self {
            factory,
            memory,
            bridge,
            memory_timeout,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    /// 取得会话，不存在则构造；同一键最多构造一次
    pub fn get_or_create(&self, key: &SessionKey) -> Result<Arc<Session>, AgentError> {
        let slot = self.slots.lock().entry(key.clone()).or_default().clone();

        let mut guard = slot.lock();
        if let Some(session) = guard.as_ref() {
            session.touch();
            return Ok(session.clone());
        }

        let start = Instant::now();
        let bundle = self.factory.build(key)?;
        let session = Arc::new(Session::new(
            key.clone(),
            bundle,
            MemoryHandle::new(key.clone(), self.memory.clone()),
        ));
        *guard = Some(session.clone());
        info!(
            session = %key,
            tools = session.bundle.tools.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "session created"
        );
        Ok(session)
    }

    pub fn get(&self, key: &SessionKey) -> Option<Arc<Session>> {
        let slot = self.slots.lock().get(key).cloned()?;
        let session = slot.lock().clone();
        session
    }

    /// 丢弃已损坏的智能体组合（不动记忆），下次访问时重新构造
    pub fn discard(&self, key: &SessionKey) -> bool {
        let slot = self.slots.lock().get(key).cloned();
        let dropped = slot.map(|s| s.lock().take().is_some()).unwrap_or(false);
        if dropped {
            warn!(session = %key, "session discarded");
        }
        dropped
    }

    /// 移除会话并清空其记忆
    pub fn evict(&self, key: &SessionKey) -> bool {
        let slot = self.slots.lock().remove(key);
        let removed = slot.map(|s| s.lock().take().is_some()).unwrap_or(false);

        let store = self.memory.clone();
        let k = key.clone();
        if let Err(e) = self
            .bridge
            .run(async move { Ok::<_, AgentError>(store.clear(&k).await) }, self.memory_timeout)
        {
            warn!(session = %key, error = %e, "memory clear did not finish");
        }
        info!(session = %key, removed, "session evicted");
        removed
    }

    /// 移除某用户的所有会话（不论对话），并清空该用户名下的全部记忆；返回移除的会话数
    pub fn evict_by_user(&self, user: &str) -> usize {
        let removed: Vec<Slot> = {
            let mut slots = self.slots.lock();
            let keys: Vec<SessionKey> = slots.keys().filter(|k| k.user == user).cloned().collect();
            keys.iter().filter_map(|k| slots.remove(k)).collect()
        };
        let count = removed
            .iter()
            .filter(|s| s.lock().take().is_some())
            .count();

        let store = self.memory.clone();
        let u = user.to_string();
        match self
            .bridge
            .run(async move { Ok::<_, AgentError>(store.clear_user(&u).await) }, self.memory_timeout)
        {
            Ok(cleared) => info!(user = %user, sessions = count, memory_keys = cleared, "user evicted"),
            Err(e) => warn!(user = %user, error = %e, "memory clear did not finish"),
        }
        count
    }

    /// 移除空闲超过 `max_idle` 的会话（记忆保留，由 TTL 管理）；正在构造的槽位跳过
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| match slot.try_lock() {
            Some(guard) => match guard.as_ref() {
                Some(session) => session.idle_for() <= max_idle,
                None => true,
            },
            None => true,
        });
        let evicted = before - slots.len();
        if evicted > 0 {
            info!(evicted, "idle sessions evicted");
        }
        evicted
    }

    /// 已构造的会话数
    pub fn len(&self) -> usize {
        let slots: Vec<Slot> = self.slots.lock().values().cloned().collect();
        slots.iter().filter(|s| s.lock().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
