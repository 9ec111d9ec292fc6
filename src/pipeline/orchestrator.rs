//! 流水线编排器：请求的顶层入口
//!
//! `handle` 返回惰性、有限、不可重启的文本片段序列。第一次拉取时才开始工作：
//! 取得会话 → 读取有界历史 → 分类 → 单阶段或两阶段执行 → 增量经 StreamChunker 下发 →
//! 结束（或出错）后把用户请求与调用方实际看到的全部输出写入记忆。
//! 出错时只下发一段可读的错误文本，流本身不会中断调用方。

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::core::{AgentError, DeltaStream, SessionKey, SessionRegistry, SyncStreamBridge};
use crate::document::{format_conversation, DocumentRenderer, DocumentRequest};
use crate::llm::LlmClient;
use crate::memory::{Message, MemoryStore, Role, Turn};
use crate::pipeline::{is_planning_request, CollectedContext, StreamChunker};
use crate::react::prompts::DOCUMENT_SUMMARY_PROMPT;
use crate::react::AgentRole;

/// 增量来源：按序产出文本增量，遇到第一个错误即结束
type DeltaSource = Box<dyn Iterator<Item = Result<String, AgentError>> + Send>;

/// 各阶段的历史窗口、超时与分段阈值
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub general_history: usize,
    pub planning_history: usize,
    pub document_history: Option<usize>,
    pub collector_timeout: Duration,
    pub memory_timeout: Duration,
    pub request_timeout: Duration,
    pub stream_timeout: Duration,
    pub text_chunk_threshold: usize,
    pub code_chunk_threshold: usize,
}

impl PipelineSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        let p = &cfg.pipeline;
        Self {
            general_history: p.general_history,
            planning_history: p.planning_history,
            document_history: p.document_history,
            collector_timeout: Duration::from_secs(p.collector_timeout_secs),
            memory_timeout: Duration::from_secs(p.memory_timeout_secs),
            request_timeout: Duration::from_secs(cfg.llm.timeouts.request),
            stream_timeout: Duration::from_secs(cfg.llm.timeouts.stream),
            text_chunk_threshold: p.text_chunk_threshold,
            code_chunk_threshold: p.code_chunk_threshold,
        }
    }

    fn history_limit(&self, role: AgentRole) -> Option<usize> {
        match role {
            AgentRole::General => Some(self.general_history),
            AgentRole::Planning => Some(self.planning_history),
            AgentRole::DocumentGenerator => self.document_history,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

pub struct PipelineOrchestrator {
    registry: Arc<SessionRegistry>,
    renderer: Arc<dyn DocumentRenderer>,
    bridge: SyncStreamBridge,
    settings: PipelineSettings,
}

impl PipelineOrchestrator {
    pub fn new(
        registry: Arc<SessionRegistry>,
        renderer: Arc<dyn DocumentRenderer>,
        bridge: SyncStreamBridge,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            registry,
            renderer,
            bridge,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// 处理一次请求；返回的序列在第一次 `next` 时才开始执行
    pub fn handle(
        self: &Arc<Self>,
        request: impl Into<String>,
        key: SessionKey,
        role: AgentRole,
    ) -> ChunkStream {
        ChunkStream {
            orchestrator: self.clone(),
            request: request.into(),
            key,
            role,
            chunker: StreamChunker::new(
                self.settings.text_chunk_threshold,
                self.settings.code_chunk_threshold,
            ),
            state: StreamState::Pending,
            ready: VecDeque::new(),
            observed: String::new(),
        }
    }

    fn memory(&self) -> &Arc<MemoryStore> {
        self.registry.memory()
    }

    /// 取得会话、读取历史并选出增量来源
    fn prepare(&self, request: &str, key: &SessionKey, role: AgentRole) -> Result<DeltaSource, AgentError> {
        let session = self.registry.get_or_create(key)?;
        let history = self.read_history(key, self.settings.history_limit(role));
        let planning = is_planning_request(request);
        info!(session = %key, role = %role, planning, history = history.len(), "handling request");

        let llm = session.bundle.llm.clone();
        match role {
            AgentRole::Planning if planning => {
                let collector = session.bundle.collector.clone();
                let messages: Vec<Message> = history.iter().map(Turn::to_message).collect();
                let collector_input = CollectedContext::collector_messages(request, &messages);
                let agent = collector.clone();
                let collected = self.bridge.run(
                    async move { agent.invoke(&collector_input).await },
                    self.settings.collector_timeout,
                )?;
                info!(session = %key, chars = collected.chars().count(), "information collected");

                let ctx = CollectedContext::new(request, collected, collector.tool_names());
                let plan = self.stream_completion(llm, ctx.planner_messages(&messages));
                let source = std::iter::once(Ok(ctx.report_preamble()))
                    .chain(plan)
                    .chain(std::iter::once(Ok(ctx.report_appendix())));
                Ok(Box::new(source))
            }
            AgentRole::General | AgentRole::Planning => {
                let mut messages = vec![Message::system(role.system_prompt())];
                messages.extend(history.iter().map(Turn::to_message));
                messages.push(Message::user(request));
                Ok(Box::new(self.stream_completion(llm, messages)))
            }
            AgentRole::DocumentGenerator => {
                let result = self.render_document(llm, request, key, &history)?;
                Ok(Box::new(std::iter::once(Ok(result))))
            }
        }
    }

    fn read_history(&self, key: &SessionKey, limit: Option<usize>) -> Vec<Turn> {
        let store = self.memory().clone();
        let k = key.clone();
        self.bridge
            .run(
                async move { Ok::<_, AgentError>(store.read(&k, limit).await) },
                self.settings.memory_timeout,
            )
            .unwrap_or_else(|e| {
                warn!(session = %key, error = %e, "history unavailable, continuing without it");
                Vec::new()
            })
    }

    fn stream_completion(&self, llm: Arc<dyn LlmClient>, messages: Vec<Message>) -> crate::core::BridgedStream {
        self.bridge.stream(
            async move {
                let deltas = llm.complete_stream(&messages).await?;
                let mapped: DeltaStream = Box::pin(deltas.map(|d| d.map_err(AgentError::from)));
                Ok(mapped)
            },
            self.settings.stream_timeout,
        )
    }

    /// 非流式：总结完整对话，交给渲染协作方，返回其结果消息
    fn render_document(
        &self,
        llm: Arc<dyn LlmClient>,
        request: &str,
        key: &SessionKey,
        history: &[Turn],
    ) -> Result<String, AgentError> {
        let conversation = format_conversation(history);
        let messages = vec![
            Message::system(DOCUMENT_SUMMARY_PROMPT),
            Message::user(format!(
                "完整对话记录：\n{conversation}\n\n用户的最新要求：{request}"
            )),
        ];
        let renderer = self.renderer.clone();
        let user = key.user.clone();
        self.bridge.run(
            async move {
                let summary = llm.complete(&messages).await?;
                renderer
                    .render(&DocumentRequest {
                        user,
                        summary,
                        conversation,
                    })
                    .await
            },
            self.settings.request_timeout,
        )
    }

    /// 记录一次交换：用户请求 + 调用方看到的全部输出
    fn record(&self, key: &SessionKey, request: &str, observed: &str) {
        let store = self.memory().clone();
        let k = key.clone();
        let request = request.to_string();
        let observed = observed.to_string();
        let result = self.bridge.run(
            async move {
                let user_ok = store.append(&k, Role::User, &request).await;
                let assistant_ok = store.append(&k, Role::Assistant, &observed).await;
                Ok::<_, AgentError>(user_ok && assistant_ok)
            },
            self.settings.memory_timeout,
        );
        match result {
            Ok(true) => {}
            Ok(false) => warn!(session = %key, "exchange only partially recorded"),
            Err(e) => warn!(session = %key, error = %e, "exchange not recorded"),
        }
    }
}

enum StreamState {
    Pending,
    Streaming(DeltaSource),
    Finishing,
    Done,
}

/// 一次请求的片段序列
pub struct ChunkStream {
    orchestrator: Arc<PipelineOrchestrator>,
    request: String,
    key: SessionKey,
    role: AgentRole,
    chunker: StreamChunker,
    state: StreamState,
    ready: VecDeque<String>,
    /// 已下发给调用方的全部文本
    observed: String,
}

impl ChunkStream {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    fn fail(&mut self, err: AgentError) {
        error!(session = %self.key, role = %self.role, error = %err, "request failed");
        self.ready.extend(self.chunker.flush());
        self.ready.push_back(err.user_message());
        if err.poisons_session() {
            self.orchestrator.registry.discard(&self.key);
        }
        self.state = StreamState::Finishing;
    }
}

impl Iterator for ChunkStream {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            if let Some(chunk) = self.ready.pop_front() {
                self.observed.push_str(&chunk);
                return Some(chunk);
            }

            match std::mem::replace(&mut self.state, StreamState::Done) {
                StreamState::Pending => {
                    match self.orchestrator.prepare(&self.request, &self.key, self.role) {
                        Ok(source) => self.state = StreamState::Streaming(source),
                        Err(e) => self.fail(e),
                    }
                }
                StreamState::Streaming(mut source) => match source.next() {
                    Some(Ok(delta)) => {
                        self.ready.extend(self.chunker.feed(&delta));
                        self.state = StreamState::Streaming(source);
                    }
                    Some(Err(e)) => self.fail(e),
                    None => {
                        self.ready.extend(self.chunker.flush());
                        self.state = StreamState::Finishing;
                    }
                },
                StreamState::Finishing => {
                    self.orchestrator
                        .record(&self.key, &self.request, &self.observed);
                    info!(session = %self.key, chars = self.observed.chars().count(), "request completed");
                    return None;
                }
                StreamState::Done => return None,
            }
        }
    }
}

impl Drop for ChunkStream {
    /// 调用方中途放弃时，按已下发的内容记录本次交换
    fn drop(&mut self) {
        if matches!(self.state, StreamState::Streaming(_) | StreamState::Finishing) {
            self.state = StreamState::Done;
            warn!(session = %self.key, chars = self.observed.chars().count(), "stream dropped before completion");
            self.orchestrator
                .record(&self.key, &self.request, &self.observed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemorySection;
    use crate::core::{AgentBundle, BundleFactory};
    use crate::document::TextFileRenderer;
    use crate::llm::{LlmError, MockLlmClient};
    use crate::react::prompts::{GENERAL_SYSTEM_PROMPT, PLANNING_SYSTEM_PROMPT};
    use crate::react::ToolAgent;
    use crate::tools::ToolList;

    struct MockFactory {
        llm: Arc<MockLlmClient>,
    }

    impl BundleFactory for MockFactory {
        fn build(&self, _key: &SessionKey) -> Result<AgentBundle, AgentError> {
            let llm: Arc<dyn LlmClient> = self.llm.clone();
            let collector = ToolAgent::new(llm.clone(), &[], "collect", Duration::from_secs(1), 2);
            Ok(AgentBundle {
                llm,
                tools: ToolList::from(Vec::new()),
                collector: Arc::new(collector),
            })
        }
    }

    struct Fixture {
        orchestrator: Arc<PipelineOrchestrator>,
        _dir: tempfile::TempDir,
    }

    fn fixture(llm: Arc<MockLlmClient>, settings: PipelineSettings) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let bridge = SyncStreamBridge::new();
        let memory = Arc::new(MemoryStore::in_process(&MemorySection::default()));
        let registry = Arc::new(SessionRegistry::new(
            Arc::new(MockFactory { llm }),
            memory,
            bridge.clone(),
            Duration::from_secs(5),
        ));
        let renderer = Arc::new(TextFileRenderer::new(dir.path()));
        Fixture {
            orchestrator: Arc::new(PipelineOrchestrator::new(registry, renderer, bridge, settings)),
            _dir: dir,
        }
    }

    fn turns(orch: &PipelineOrchestrator, key: &SessionKey) -> Vec<Turn> {
        let store = orch.memory().clone();
        let k = key.clone();
        SyncStreamBridge::new()
            .run(
                async move { Ok::<_, AgentError>(store.read(&k, None).await) },
                Duration::from_secs(5),
            )
            .unwrap()
    }

    #[test]
    fn test_general_stream_is_lazy_and_recorded() {
        let reply = "你好！我是青鸾向导。很高兴为您服务，请问有什么可以帮您？";
        let llm = Arc::new(MockLlmClient::new().with_replies([reply]).with_delta_chars(3));
        let fx = fixture(llm.clone(), PipelineSettings::default());
        let key = SessionKey::new("u", "c");

        let stream = fx.orchestrator.handle("你好", key.clone(), AgentRole::General);
        assert_eq!(llm.calls(), 0);

        let chunks: Vec<String> = stream.collect();
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), reply);

        let log = turns(&fx.orchestrator, &key);
        assert_eq!(log.len(), 2);
        assert_eq!((log[0].role, log[0].content.as_str()), (Role::User, "你好"));
        assert_eq!((log[1].role, log[1].content.as_str()), (Role::Assistant, reply));
        assert_eq!(llm.seen_messages()[0][0].content, GENERAL_SYSTEM_PROMPT);
    }

    #[test]
    fn test_history_window_per_role() {
        let llm = Arc::new(MockLlmClient::new());
        let fx = fixture(llm.clone(), PipelineSettings::default());
        let key = SessionKey::new("u", "c");
        for i in 0..6 {
            fx.orchestrator
                .handle(format!("问题{i}"), key.clone(), AgentRole::General)
                .for_each(drop);
        }

        fx.orchestrator
            .handle("最后一个问题", key.clone(), AgentRole::General)
            .for_each(drop);
        // system + 最近 10 条历史 + 本次请求
        let last_call = llm.seen_messages().pop().unwrap();
        assert_eq!(last_call.len(), 12);
        assert_eq!(last_call[1].content, "问题1");
    }

    #[test]
    fn test_two_stage_planning() {
        let llm = Arc::new(
            MockLlmClient::new().with_replies(["航班 800 元；西湖免费", "第一天：游西湖。"]),
        );
        let fx = fixture(llm.clone(), PipelineSettings::default());
        let key = SessionKey::new("u", "trip");

        let output: String = fx
            .orchestrator
            .handle("帮我规划杭州三日游行程", key.clone(), AgentRole::Planning)
            .collect();

        assert!(output.starts_with("# 🎯 专业旅行规划方案"));
        assert!(output.contains("第一天：游西湖。"));
        assert!(output.contains("<details>"));
        assert!(output.contains("航班 800 元；西湖免费"));

        let planner_call = &llm.seen_messages()[1];
        let handoff = &planner_call.last().unwrap().content;
        assert!(handoff.contains("帮我规划杭州三日游行程"));
        assert!(handoff.contains("航班 800 元；西湖免费"));

        let log = turns(&fx.orchestrator, &key);
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].content, output);
    }

    #[test]
    fn test_planning_role_non_planning_request_uses_single_stage() {
        let llm = Arc::new(MockLlmClient::new().with_replies(["晴，25 度。"]));
        let fx = fixture(llm.clone(), PipelineSettings::default());

        let output: String = fx
            .orchestrator
            .handle("what's the weather", SessionKey::new("u", "c"), AgentRole::Planning)
            .collect();

        assert_eq!(output, "晴，25 度。");
        assert_eq!(llm.calls(), 1);
        assert_eq!(llm.seen_messages()[0][0].content, PLANNING_SYSTEM_PROMPT);
    }

    #[test]
    fn test_collector_failure_yields_one_error_chunk_and_two_turns() {
        let llm = Arc::new(MockLlmClient::new());
        llm.push(Err(LlmError::Request("upstream 502".to_string())));
        let fx = fixture(llm.clone(), PipelineSettings::default());
        let key = SessionKey::new("u", "trip");
        let first_session = fx.orchestrator.registry().get_or_create(&key).unwrap();

        let chunks: Vec<String> = fx
            .orchestrator
            .handle("规划一次东京旅行", key.clone(), AgentRole::Planning)
            .collect();

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("upstream 502"));

        let log = turns(&fx.orchestrator, &key);
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].content, "规划一次东京旅行");
        assert_eq!(log[1].content, chunks[0]);

        // 损坏的会话被丢弃，下次重建
        let next_session = fx.orchestrator.registry().get_or_create(&key).unwrap();
        assert!(!Arc::ptr_eq(&first_session, &next_session));
    }

    #[test]
    fn test_mid_stream_error_keeps_partial_output() {
        let llm = Arc::new(MockLlmClient::new());
        llm.push_broken_stream("已经生成的一部分内容。", LlmError::Stream("connection reset".to_string()));
        let fx = fixture(llm, PipelineSettings::default());
        let key = SessionKey::new("u", "c");
        let first_session = fx.orchestrator.registry().get_or_create(&key).unwrap();

        let chunks: Vec<String> = fx
            .orchestrator
            .handle("介绍一下杭州", key.clone(), AgentRole::General)
            .collect();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "已经生成的一部分内容。");
        assert!(chunks[1].contains("connection reset"));

        let log = turns(&fx.orchestrator, &key);
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].content, "介绍一下杭州");
        assert_eq!(log[1].content, chunks.concat());

        let next_session = fx.orchestrator.registry().get_or_create(&key).unwrap();
        assert!(!Arc::ptr_eq(&first_session, &next_session));
    }

    #[test]
    fn test_planner_stage_error_after_partial_plan() {
        let llm = Arc::new(MockLlmClient::new());
        llm.push(Ok("收集到的信息".to_string()));
        llm.push_broken_stream("第一天：", LlmError::Stream("connection reset".to_string()));
        let fx = fixture(llm, PipelineSettings::default());
        let key = SessionKey::new("u", "trip");
        let first_session = fx.orchestrator.registry().get_or_create(&key).unwrap();

        let chunks: Vec<String> = fx
            .orchestrator
            .handle("规划一次东京旅行", key.clone(), AgentRole::Planning)
            .collect();
        let output = chunks.concat();

        assert!(chunks[0].starts_with("# 🎯 专业旅行规划方案"));
        assert!(output.contains("第一天："));
        assert!(!output.contains("<details>"));
        assert_eq!(chunks.iter().filter(|c| c.contains("connection reset")).count(), 1);
        assert!(chunks.last().unwrap().contains("connection reset"));

        let log = turns(&fx.orchestrator, &key);
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].content, output);

        let next_session = fx.orchestrator.registry().get_or_create(&key).unwrap();
        assert!(!Arc::ptr_eq(&first_session, &next_session));
    }

    #[test]
    fn test_dropped_stream_records_what_was_seen() {
        let llm = Arc::new(
            MockLlmClient::new()
                .with_replies(["第一句。第二句。第三句。"])
                .with_delta_chars(4),
        );
        let fx = fixture(llm, PipelineSettings::default());
        let key = SessionKey::new("u", "c");

        let mut stream = fx.orchestrator.handle("说三句话", key.clone(), AgentRole::General);
        assert_eq!(stream.next().as_deref(), Some("第一句。"));
        drop(stream);

        let log = turns(&fx.orchestrator, &key);
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].content, "第一句。");
    }

    #[test]
    fn test_unstarted_stream_records_nothing() {
        let fx = fixture(Arc::new(MockLlmClient::new()), PipelineSettings::default());
        let key = SessionKey::new("u", "c");
        drop(fx.orchestrator.handle("hi", key.clone(), AgentRole::General));
        assert!(turns(&fx.orchestrator, &key).is_empty());
    }

    #[test]
    fn test_collector_timeout_surfaces_as_chunk() {
        let llm = Arc::new(MockLlmClient::new().with_delay(Duration::from_secs(2)));
        let settings = PipelineSettings {
            collector_timeout: Duration::from_millis(100),
            ..PipelineSettings::default()
        };
        let fx = fixture(llm, settings);

        let start = std::time::Instant::now();
        let chunks: Vec<String> = fx
            .orchestrator
            .handle("plan a trip", SessionKey::new("u", "c"), AgentRole::Planning)
            .collect();

        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("超时"));
    }

    #[test]
    fn test_document_role_yields_single_chunk() {
        let llm = Arc::new(MockLlmClient::new().with_replies(["总结：杭州三日游"]));
        let fx = fixture(llm, PipelineSettings::default());

        let chunks: Vec<String> = fx
            .orchestrator
            .handle("生成报告", SessionKey::new("u", "c"), AgentRole::DocumentGenerator)
            .collect();

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("下载文本文件"));
    }

    #[test]
    fn test_stream_not_restartable() {
        let llm = Arc::new(MockLlmClient::new().with_replies(["好的。"]));
        let fx = fixture(llm, PipelineSettings::default());
        let mut stream = fx.orchestrator.handle("hi", SessionKey::new("u", "c"), AgentRole::General);

        assert_eq!(stream.next().as_deref(), Some("好的。"));
        assert!(stream.next().is_none());
        assert!(stream.next().is_none());
    }
}
