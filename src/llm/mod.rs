//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError, TextStream};

use crate::config::LlmSection;
use crate::core::AgentError;

/// 根据配置与环境变量选择 LLM 后端（DeepSeek / OpenAI 兼容 / Mock）
///
/// 非 mock 后端缺少凭据时返回 `AgentError::Config`，不静默降级。
pub fn create_llm_from_config(cfg: &LlmSection) -> Result<Arc<dyn LlmClient>, AgentError> {
    match cfg.provider.to_lowercase().as_str() {
        "mock" => {
            tracing::warn!("Using Mock LLM");
            Ok(Arc::new(MockLlmClient::new()))
        }
        "deepseek" => {
            let key = std::env::var("DEEPSEEK_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .map_err(|_| AgentError::Config("DEEPSEEK_API_KEY is not set".to_string()))?;
            let model = if cfg.model.starts_with("deepseek") {
                Some(cfg.model.as_str())
            } else {
                None
            };
            let client = create_deepseek_client(model, &key);
            tracing::info!(provider = "deepseek", "LLM backend ready");
            Ok(Arc::new(client))
        }
        "openai" => {
            let key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| AgentError::Config("OPENAI_API_KEY is not set".to_string()))?;
            let base = cfg
                .base_url
                .clone()
                .or_else(|| std::env::var("OPENAI_API_URL").ok());
            tracing::info!(provider = "openai", model = %cfg.model, "LLM backend ready");
            Ok(Arc::new(OpenAiClient::new(base.as_deref(), &cfg.model, &key)))
        }
        other => Err(AgentError::Config(format!("unknown llm provider: {other}"))),
    }
}
