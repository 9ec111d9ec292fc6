//! 带工具的 ReAct 智能体
//!
//! Plan -> Act (Tool) -> Observe -> 下一轮 Plan，直到模型给出最终回复或达到最大步数。
//! 工具集为空时退化为一次普通补全。

use std::sync::Arc;
use std::time::Duration;

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::react::prompts::tool_instructions;
use crate::react::{parse_llm_output, PlannerOutput};
use crate::tools::{ToolDescriptor, ToolExecutor, ToolRegistry};

/// Observation 写回对话时的最大字符数
const OBSERVATION_MAX_CHARS: usize = 4000;

/// 持有模型、工具执行器与系统提示词的 ReAct 智能体
pub struct ToolAgent {
    llm: Arc<dyn LlmClient>,
    executor: ToolExecutor,
    system_prompt: String,
    max_steps: usize,
}

impl ToolAgent {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: &[ToolDescriptor],
        system_prompt: impl Into<String>,
        call_timeout: Duration,
        max_steps: usize,
    ) -> Self {
        Self {
            llm,
            executor: ToolExecutor::new(ToolRegistry::from_descriptors(tools), call_timeout),
            system_prompt: system_prompt.into(),
            max_steps: max_steps.max(1),
        }
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.executor.tool_names()
    }

    /// 运行到最终回复；返回最后一条模型文本
    pub async fn invoke(&self, messages: &[Message]) -> Result<String, AgentError> {
        if self.executor.is_empty() {
            let mut full = vec![Message::system(self.system_prompt.clone())];
            full.extend_from_slice(messages);
            return Ok(self.llm.complete(&full).await?);
        }

        let system = format!(
            "{}{}",
            self.system_prompt,
            tool_instructions(&self.executor.schema_json())
        );
        let mut conversation = vec![Message::system(system)];
        conversation.extend_from_slice(messages);

        let mut last_output = String::new();
        for step in 0..self.max_steps {
            let output = self.llm.complete(&conversation).await?;
            tracing::debug!(step, chars = output.chars().count(), "agent step");

            match parse_llm_output(&output) {
                Ok(PlannerOutput::Response(resp)) => return Ok(resp),
                Ok(PlannerOutput::ToolCall(tc)) => {
                    let observation = if !self.executor.has_tool(&tc.tool) {
                        let e = AgentError::HallucinatedTool(tc.tool.clone());
                        tracing::warn!(tool = %tc.tool, "model requested an unknown tool");
                        format!(
                            "Error: {}. Available tools: {}",
                            e,
                            self.executor.tool_names().join(", ")
                        )
                    } else {
                        match self.executor.execute(&tc.tool, tc.args.clone()).await {
                            Ok(r) => truncate(&r, OBSERVATION_MAX_CHARS),
                            Err(e) => format!("Error: {}", e),
                        }
                    };
                    conversation.push(Message::assistant(output.clone()));
                    conversation.push(Message::user(format!(
                        "Observation from {}: {}",
                        tc.tool, observation
                    )));
                }
                Err(AgentError::JsonParseError(detail)) => {
                    conversation.push(Message::assistant(output.clone()));
                    conversation.push(Message::user(format!(
                        "上一条输出的 JSON 无法解析（{detail}）。请输出合法的工具调用 JSON，或直接给出最终答案。"
                    )));
                }
                Err(e) => return Err(e),
            }
            last_output = output;
        }

        tracing::warn!(max_steps = self.max_steps, "agent step limit reached");
        Ok(last_output)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        format!("{}...", s.chars().take(max).collect::<String>())
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::memory::Role;
    use crate::tools::registry::tests::EchoTool;

    fn echo_tools() -> Vec<ToolDescriptor> {
        vec![ToolDescriptor::from_tool(Arc::new(EchoTool))]
    }

    #[tokio::test]
    async fn test_tool_call_then_final_answer() {
        let mock = Arc::new(MockLlmClient::new().with_replies([
            r#"{"tool": "echo", "args": {"text": "机票 1200 元"}}"#,
            "收集结果：机票 1200 元",
        ]));
        let agent = ToolAgent::new(mock.clone(), &echo_tools(), "collect", Duration::from_secs(1), 4);

        let out = agent.invoke(&[Message::user("去杭州")]).await.unwrap();
        assert_eq!(out, "收集结果：机票 1200 元");

        let second_call = &mock.seen_messages()[1];
        let last = second_call.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert_eq!(last.content, "Observation from echo: 机票 1200 元");
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_observation() {
        let mock = Arc::new(MockLlmClient::new().with_replies([
            r#"{"tool": "book_hotel", "args": {}}"#,
            "done",
        ]));
        let agent = ToolAgent::new(mock.clone(), &echo_tools(), "collect", Duration::from_secs(1), 4);

        assert_eq!(agent.invoke(&[Message::user("x")]).await.unwrap(), "done");
        let seen = mock.seen_messages();
        let observation = &seen[1].last().unwrap().content;
        assert!(observation.contains("book_hotel"));
        assert!(observation.contains("echo"));
    }

    #[tokio::test]
    async fn test_without_tools_single_completion() {
        let mock = Arc::new(MockLlmClient::new().with_replies(["plain answer"]));
        let agent = ToolAgent::new(mock.clone(), &[], "sys", Duration::from_secs(1), 4);

        assert_eq!(agent.invoke(&[Message::user("q")]).await.unwrap(), "plain answer");
        assert_eq!(mock.calls(), 1);
        assert_eq!(mock.seen_messages()[0][0].content, "sys");
    }

    #[tokio::test]
    async fn test_step_limit_returns_last_output() {
        let call = r#"{"tool": "echo", "args": {"text": "again"}}"#;
        let mock = Arc::new(MockLlmClient::new().with_replies([call, call, call]));
        let agent = ToolAgent::new(mock.clone(), &echo_tools(), "collect", Duration::from_secs(1), 2);

        let out = agent.invoke(&[Message::user("loop")]).await.unwrap();
        assert_eq!(out, call);
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_model_failure_propagates() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push(Err(crate::llm::LlmError::Request("502".to_string())));
        let agent = ToolAgent::new(mock, &echo_tools(), "collect", Duration::from_secs(1), 2);

        let err = agent.invoke(&[Message::user("x")]).await.unwrap_err();
        assert!(matches!(err, AgentError::Llm(_)));
    }
}
