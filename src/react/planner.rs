//! Tool Call 解析
//!
//! parse_llm_output 从模型文本中提取 JSON 并解析为 ToolCall 或直接回复，
//! 调用方只面对一个带标签的结果类型。

use serde::{Deserialize, Serialize};

use crate::core::AgentError;

/// LLM 返回的 Tool Call（简化 JSON：{"tool": "search_hotels", "args": {"city": "..."}}）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// 一次模型输出的解析结果
#[derive(Debug, Clone)]
pub enum PlannerOutput {
    /// 直接回复用户
    Response(String),
    /// 需要执行工具
    ToolCall(ToolCall),
}

/// 解析 LLM 输出：若含有效 JSON 且 tool 非空则为 ToolCall，否则为 Response
///
/// ```json 代码块内的 JSON 无法解析时返回 `JsonParseError`；正文中零散的花括号按普通回复处理。
pub fn parse_llm_output(output: &str) -> Result<PlannerOutput, AgentError> {
    let trimmed = output.trim();

    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        let json_str = rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim());
        let parsed: ToolCall = serde_json::from_str(json_str)
            .map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, json_str)))?;
        return Ok(classify(parsed, trimmed));
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(parsed) = serde_json::from_str::<ToolCall>(&trimmed[start..=end]) {
                return Ok(classify(parsed, trimmed));
            }
        }
    }

    Ok(PlannerOutput::Response(trimmed.to_string()))
}

fn classify(parsed: ToolCall, original: &str) -> PlannerOutput {
    if parsed.tool.is_empty() {
        PlannerOutput::Response(original.to_string())
    } else {
        PlannerOutput::ToolCall(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_json_tool_call() {
        let out = parse_llm_output(r#"{"tool": "search_hotels", "args": {"city": "杭州"}}"#).unwrap();
        match out {
            PlannerOutput::ToolCall(tc) => {
                assert_eq!(tc.tool, "search_hotels");
                assert_eq!(tc.args["city"], "杭州");
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn test_fenced_json_tool_call() {
        let out = parse_llm_output("我先查一下航班。\n```json\n{\"tool\": \"search_flights\", \"args\": {}}\n```").unwrap();
        assert!(matches!(out, PlannerOutput::ToolCall(tc) if tc.tool == "search_flights"));
    }

    #[test]
    fn test_plain_text_and_stray_braces_are_responses() {
        assert!(matches!(
            parse_llm_output("西湖是杭州最著名的景点。").unwrap(),
            PlannerOutput::Response(_)
        ));
        assert!(matches!(
            parse_llm_output("集合 {a, b} 的大小是 2").unwrap(),
            PlannerOutput::Response(_)
        ));
    }

    #[test]
    fn test_broken_fenced_json_is_error() {
        let err = parse_llm_output("```json\n{\"tool\": \n```").unwrap_err();
        assert!(matches!(err, AgentError::JsonParseError(_)));
    }
}
