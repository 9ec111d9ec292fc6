//! 无头 Agent 服务
//!
//! 按配置装配全部协作方（模型、记忆、工具连接、会话注册表、文档渲染、流水线），
//! 对外只暴露同步接口：`handle` 返回逐段拉取的文本片段序列，其余为会话与记忆的管理操作。
//! 供 REPL 或任意 HTTP / 消息前端调用。

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::AppConfig;
use crate::core::{
    AgentError, BundleFactory, DefaultBundleFactory, SessionKey, SessionRegistry, SyncStreamBridge,
};
use crate::document::{DocumentRenderer, TextFileRenderer};
use crate::llm::create_llm_from_config;
use crate::memory::{MemoryStats, MemoryStore};
use crate::pipeline::{ChunkStream, PipelineOrchestrator, PipelineSettings};
use crate::react::AgentRole;
use crate::tools::ToolConnection;

pub struct AgentService {
    orchestrator: Arc<PipelineOrchestrator>,
    tools: Arc<ToolConnection>,
    bridge: SyncStreamBridge,
}

impl AgentService {
    /// 从配置构建；缺少模型凭据时返回 `AgentError::Config`
    pub fn from_config(cfg: &AppConfig) -> Result<Self, AgentError> {
        let bridge = SyncStreamBridge::new();
        let llm = create_llm_from_config(&cfg.llm)?;

        let memory_cfg = cfg.memory.clone();
        let connect_deadline = Duration::from_secs(cfg.memory.connect_timeout_secs + 1);
        let memory = bridge
            .run(
                async move { Ok::<_, AgentError>(MemoryStore::connect(&memory_cfg).await) },
                connect_deadline,
            )
            .unwrap_or_else(|e| {
                warn!(error = %e, "memory backend not ready, using in-process memory");
                MemoryStore::in_process(&cfg.memory)
            });
        let memory = Arc::new(memory);

        let tools = Arc::new(ToolConnection::new(&cfg.tools));
        let factory = Arc::new(DefaultBundleFactory::new(
            llm,
            tools.clone(),
            bridge.clone(),
            Duration::from_secs(cfg.tools.call_timeout_secs),
            cfg.tools.max_steps,
        ));
        let renderer = Arc::new(
            TextFileRenderer::new(cfg.document.output_dir.clone())
                .with_link_base(cfg.document.link_base.clone()),
        );

        info!(
            provider = %cfg.llm.provider,
            model = %cfg.llm.model,
            memory = memory.backend_name(),
            tool_server = cfg.tools.server.is_some(),
            "agent service ready"
        );
        Ok(Self::with_parts(
            factory,
            memory,
            tools,
            renderer,
            bridge,
            PipelineSettings::from_config(cfg),
        ))
    }

    /// 由已构建的协作方组装
    pub fn with_parts(
        factory: Arc<dyn BundleFactory>,
        memory: Arc<MemoryStore>,
        tools: Arc<ToolConnection>,
        renderer: Arc<dyn DocumentRenderer>,
        bridge: SyncStreamBridge,
        settings: PipelineSettings,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new(
            factory,
            memory,
            bridge.clone(),
            settings.memory_timeout,
        ));
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            registry,
            renderer,
            bridge.clone(),
            settings,
        ));
        Self {
            orchestrator,
            tools,
            bridge,
        }
    }

    /// 处理一次请求，返回惰性的片段序列
    pub fn handle(
        &self,
        request: impl Into<String>,
        user: &str,
        conversation: &str,
        role: AgentRole,
    ) -> ChunkStream {
        self.orchestrator
            .handle(request, SessionKey::new(user, conversation), role)
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.orchestrator.registry()
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        self.registry().memory()
    }

    pub fn tools(&self) -> &Arc<ToolConnection> {
        &self.tools
    }

    /// 清除某用户的全部会话与对话记录，返回移除的会话数
    pub fn clear_user(&self, user: &str) -> usize {
        self.registry().evict_by_user(user)
    }

    /// 移除单个会话并清除其对话记录
    pub fn evict(&self, user: &str, conversation: &str) -> bool {
        self.registry().evict(&SessionKey::new(user, conversation))
    }

    /// 移除空闲超过 `max_idle` 的会话（对话记录保留，由 TTL 自然过期）
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        self.registry().evict_idle(max_idle)
    }

    pub fn memory_stats(&self) -> Result<MemoryStats, AgentError> {
        let store = self.memory().clone();
        self.bridge.run(
            async move { Ok::<_, AgentError>(store.stats().await) },
            self.orchestrator.settings().memory_timeout,
        )
    }

    /// 清理过期的进程内对话记录，返回清理条数
    pub fn purge_expired(&self) -> Result<usize, AgentError> {
        let store = self.memory().clone();
        self.bridge.run(
            async move { Ok::<_, AgentError>(store.purge_expired().await) },
            self.orchestrator.settings().memory_timeout,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmSection;

    #[test]
    fn test_from_config_with_mock_provider() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.llm = LlmSection {
            provider: "mock".to_string(),
            ..LlmSection::default()
        };
        cfg.document.output_dir = dir.path().to_path_buf();

        let service = AgentService::from_config(&cfg).unwrap();
        let reply: String = service.handle("你好", "u", "c", AgentRole::General).collect();
        assert!(reply.contains("你好"));
        assert_eq!(service.registry().len(), 1);
        assert_eq!(service.tools().attempts(), 0);

        assert_eq!(service.clear_user("u"), 1);
        assert!(service.registry().is_empty());
        assert_eq!(service.memory_stats().unwrap().active_sessions, 0);
    }

    #[test]
    fn test_unknown_provider_is_config_error() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "nope".to_string();
        assert!(matches!(
            AgentService::from_config(&cfg),
            Err(AgentError::Config(_))
        ));
    }
}
