//! 智能体角色与各阶段系统提示词

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 请求所用的智能体角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    #[default]
    General,
    Planning,
    DocumentGenerator,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::General => "general",
            AgentRole::Planning => "planning",
            AgentRole::DocumentGenerator => "document",
        }
    }

    /// 解析角色名；未知名称回落到 General
    pub fn parse_lossy(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }

    /// 该角色的系统提示词
    pub fn system_prompt(&self) -> &'static str {
        match self {
            AgentRole::General => GENERAL_SYSTEM_PROMPT,
            AgentRole::Planning => PLANNING_SYSTEM_PROMPT,
            AgentRole::DocumentGenerator => DOCUMENT_SUMMARY_PROMPT,
        }
    }
}

impl FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "general" => Ok(AgentRole::General),
            "travel" | "planning" => Ok(AgentRole::Planning),
            "pdf_generator" | "document" => Ok(AgentRole::DocumentGenerator),
            other => Err(format!("unknown agent role: {other}")),
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const GENERAL_SYSTEM_PROMPT: &str = "你是青鸾向导，一个友好、专业的AI助手。\
请用简洁清晰的中文回答用户的问题，必要时使用 Markdown 组织内容。";

pub const PLANNING_SYSTEM_PROMPT: &str = "你是青鸾向导的旅行规划顾问。\
请根据用户的需求与对话上下文，给出具体、可执行的出行建议，包括交通、住宿、景点与时间安排。";

pub const COLLECTOR_SYSTEM_PROMPT: &str = "你是信息收集智能体。\
你的任务是尽可能使用可用的搜索工具，为用户的旅行需求收集航班、酒店、景点、天气、交通等最新信息，\
并把收集到的事实（价格、地址、时间等）整理成结构化的要点。不要制定行程，只输出收集到的信息。";

pub const PLANNER_SYSTEM_PROMPT: &str = "你是行程规划智能体。\
请基于信息收集智能体提供的详细信息，为用户制定完整的个性化旅行方案，\
充分利用其中的具体信息（价格、地址、时间等），按天给出可执行的安排。";

pub const DOCUMENT_SUMMARY_PROMPT: &str = "你是旅行规划报告撰写助手。\
请阅读下面的完整对话记录，总结用户的需求与最终确定的方案，输出一份条理清晰的报告摘要。";

/// 工具使用说明，附加在带工具的智能体系统提示词之后
pub fn tool_instructions(schema_json: &str) -> String {
    format!(
        "\n\n## Available tools\n{schema_json}\n\n\
         需要调用工具时，只输出一个 JSON 对象：{{\"tool\": \"<工具名>\", \"args\": {{...}}}}。\
         收到工具结果后继续；信息足够时直接输出最终答案（不要包含 JSON）。"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_aliases() {
        assert_eq!(AgentRole::parse_lossy("travel"), AgentRole::Planning);
        assert_eq!(AgentRole::parse_lossy("Planning"), AgentRole::Planning);
        assert_eq!(
            AgentRole::parse_lossy("pdf_generator"),
            AgentRole::DocumentGenerator
        );
        assert_eq!(AgentRole::parse_lossy("document"), AgentRole::DocumentGenerator);
        assert_eq!(AgentRole::parse_lossy("weather"), AgentRole::General);
        assert!("weather".parse::<AgentRole>().is_err());
    }
}
