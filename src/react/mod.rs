//! 认知层：Tool Call 解析、带工具的 ReAct 智能体、角色与提示词

pub mod loop_;
pub mod planner;
pub mod prompts;

pub use loop_::ToolAgent;
pub use planner::{parse_llm_output, PlannerOutput, ToolCall};
pub use prompts::AgentRole;
