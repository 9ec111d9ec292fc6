//! 青鸾向导 - 按会话编排的多阶段流式智能体引擎
//!
//! 模块划分：
//! - **agent**: 无头服务入口，按配置装配所有协作方
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、同步/异步桥接、会话注册表
//! - **document**: 文档渲染（文本报告）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 对话记忆（Redis 持久化 + 进程内退化）
//! - **pipeline**: 请求分类、两阶段交接、流式分段、顶层编排
//! - **react**: Tool Call 解析、带工具的 ReAct 智能体、角色提示词
//! - **tools**: 外部工具服务连接（stdio JSON-RPC）、注册表与执行器

pub mod agent;
pub mod config;
pub mod core;
pub mod document;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod pipeline;
pub mod react;
pub mod tools;

pub use agent::AgentService;
pub use config::{load_config, AppConfig};
pub use core::{AgentError, SessionKey};
pub use pipeline::ChunkStream;
pub use react::AgentRole;
