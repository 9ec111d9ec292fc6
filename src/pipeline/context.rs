//! 两阶段流水线之间的显式交接
//!
//! 收集阶段的产出以 `CollectedContext` 传给规划阶段，而不是把文本直接拼进提示词里；
//! 规划阶段的消息和最终报告的前言/附录都从它生成。

use crate::memory::Message;
use crate::react::prompts::PLANNER_SYSTEM_PROMPT;

/// 收集阶段的输出
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedContext {
    /// 用户原始需求
    pub request: String,
    /// 收集智能体整理出的信息
    pub collected: String,
    /// 收集阶段可用的工具
    pub tool_names: Vec<String>,
}

impl CollectedContext {
    pub fn new(request: impl Into<String>, collected: impl Into<String>, tool_names: Vec<String>) -> Self {
        Self {
            request: request.into(),
            collected: collected.into(),
            tool_names,
        }
    }

    /// 收集阶段的输入：历史 + 带任务说明的需求
    pub fn collector_messages(request: &str, history: &[Message]) -> Vec<Message> {
        let mut messages = history.to_vec();
        messages.push(Message::user(format!(
            "用户旅行需求：\n{request}\n\n请使用所有可用的搜索工具收集相关的旅行信息。"
        )));
        messages
    }

    /// 规划阶段的完整消息：系统提示、历史、原始需求与收集到的信息
    pub fn planner_messages(&self, history: &[Message]) -> Vec<Message> {
        let mut messages = vec![Message::system(PLANNER_SYSTEM_PROMPT)];
        messages.extend_from_slice(history);
        messages.push(Message::user(format!(
            "## 用户原始需求：\n{}\n\n## 信息收集智能体提供的详细信息：\n{}\n\n\
             请基于以上收集到的详细信息，为用户制定完整的个性化旅行方案。\
             请确保充分利用收集到的具体信息（价格、地址、时间等），制定可执行的旅行计划。",
            self.request, self.collected
        )));
        messages
    }

    /// 报告前言，在规划内容之前下发
    pub fn report_preamble(&self) -> String {
        let tools = if self.tool_names.is_empty() {
            "（本次未使用外部工具）".to_string()
        } else {
            self.tool_names.join("、")
        };
        format!(
            "# 🎯 专业旅行规划方案\n\n## 📋 规划流程说明\n\
             本方案通过两个专业智能体协作完成：\n\
             1. **信息收集智能体**：使用实时搜索工具收集最新的旅行信息（{tools}）\n\
             2. **行程规划智能体**：基于收集的信息制定个性化旅行方案\n\n---\n\n"
        )
    }

    /// 报告附录：可折叠的收集详情
    pub fn report_appendix(&self) -> String {
        format!(
            "\n\n---\n\n## 📊 信息收集详情\n<details>\n<summary>点击查看详细的信息收集过程</summary>\n\n\
             {}\n\n</details>\n\n---\n\n*本规划方案由AI多智能体系统生成，基于实时搜索的最新信息制定。*\n",
            self.collected
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Role;

    #[test]
    fn test_planner_messages_carry_request_and_collected_info() {
        let ctx = CollectedContext::new("杭州三日游", "西湖门票免费", vec!["search".to_string()]);
        let history = vec![Message::user("之前的问题"), Message::assistant("之前的回答")];
        let messages = ctx.planner_messages(&history);

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "之前的问题");
        let last = &messages[3].content;
        assert!(last.contains("杭州三日游"));
        assert!(last.contains("西湖门票免费"));
    }

    #[test]
    fn test_report_framing() {
        let ctx = CollectedContext::new("r", "collected facts", vec![]);
        assert!(ctx.report_preamble().contains("本次未使用外部工具"));
        let appendix = ctx.report_appendix();
        assert!(appendix.contains("<details>"));
        assert!(appendix.contains("collected facts"));
    }
}
