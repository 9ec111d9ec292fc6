//! Agent 错误类型
//!
//! 统一的错误分类：配置、工具不可用、桥接超时、模型上游、记忆降级、会话损坏等。
//! 流式接口上任何错误最终都化为一段用户可读的文本（见 `user_message`）。

use std::time::Duration;

use thiserror::Error;

use crate::llm::LlmError;

/// 编排过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 缺少必需的凭据或配置非法；构造服务/会话时致命，不重试
    #[error("Config error: {0}")]
    Config(String),

    /// 工具服务无法启动或握手失败；上层降级为无工具运行
    #[error("Tool server unavailable: {0}")]
    ToolUnavailable(String),

    /// 桥接调用超过截止时间，后台工作被放弃
    #[error("Invocation timed out after {0:?}")]
    Timeout(Duration),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// 记忆后端读写失败（构造之后才发现的故障）
    #[error("Memory backend degraded: {0}")]
    MemoryDegraded(String),

    /// 智能体实例已不可用，需要丢弃并重建
    #[error("Session corrupted: {0}")]
    SessionCorruption(String),

    /// 桥接工作线程 panic，未返回结果
    #[error("Bridge worker panicked")]
    WorkerPanicked,

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Hallucinated tool: {0}")]
    HallucinatedTool(String),

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Document rendering failed: {0}")]
    Document(String),
}

impl AgentError {
    /// 流中最后一段错误文本（用户可见，同时作为 assistant 轮次写入记忆）
    pub fn user_message(&self) -> String {
        match self {
            AgentError::Timeout(d) => format!(
                "\n\n抱歉，处理您的请求超时（{} 秒），请稍后重试。\n\n",
                d.as_secs()
            ),
            other => format!("\n\n抱歉，处理您的请求时出现了问题: {other}\n\n"),
        }
    }

    /// 该错误是否说明会话内的智能体实例不可再用
    pub fn poisons_session(&self) -> bool {
        !matches!(
            self,
            AgentError::MemoryDegraded(_) | AgentError::Config(_) | AgentError::Document(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_mentions_seconds() {
        let err = AgentError::Timeout(Duration::from_secs(60));
        assert!(err.user_message().contains("60"));
    }

    #[test]
    fn test_llm_error_message_contains_cause() {
        let err = AgentError::from(LlmError::Request("rate limited".into()));
        let msg = err.user_message();
        assert!(msg.contains("rate limited"));
        assert!(err.poisons_session());
    }

    #[test]
    fn test_memory_degradation_keeps_session() {
        assert!(!AgentError::MemoryDegraded("down".into()).poisons_session());
    }
}
