//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `QINGLUAN__*` 覆盖（双下划线表示嵌套，如 `QINGLUAN__MEMORY__REDIS_URL=redis://127.0.0.1/`）。
//! 凭据（`OPENAI_API_KEY` / `DEEPSEEK_API_KEY`）不进配置文件，只从环境变量读取。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub memory: MemorySection,
    pub tools: ToolsSection,
    pub pipeline: PipelineSection,
    pub document: DocumentSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择、模型与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai / deepseek / mock
    pub provider: String,
    pub model: String,
    /// 未设置时回落到环境变量 OPENAI_API_URL
    pub base_url: Option<String>,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4.1".to_string(),
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    pub request: u64,
    pub stream: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: 60,
            stream: 120,
        }
    }
}

/// [memory] 段：持久化后端地址、条数上限与过期时间
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    /// 未设置时直接使用进程内存储
    pub redis_url: Option<String>,
    pub key_prefix: String,
    /// 最多保留的记录数（60 条即 30 轮对话）
    pub max_length: usize,
    pub ttl_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: "agent_memory:".to_string(),
            max_length: 60,
            ttl_secs: 7 * 24 * 3600,
            connect_timeout_secs: 5,
        }
    }
}

/// [tools] 段：外部工具服务与调用限制
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 未配置时不加载任何工具
    pub server: Option<ToolServerSection>,
    pub handshake_timeout_secs: u64,
    /// 单次工具调用超时（秒）
    pub call_timeout_secs: u64,
    /// 收集智能体单次调用内最多的工具步数
    pub max_steps: usize,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            server: None,
            handshake_timeout_secs: 30,
            call_timeout_secs: 30,
            max_steps: 8,
        }
    }
}

/// [tools.server] 段：以子进程方式启动的工具服务（stdio JSON-RPC）
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ToolServerSection {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// 值为 `${VAR}` 时从本进程环境变量展开
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// [pipeline] 段：各角色历史窗口、阶段超时、分段阈值
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub general_history: usize,
    pub planning_history: usize,
    /// 文档生成读取的历史条数，未设置为全部
    pub document_history: Option<usize>,
    pub collector_timeout_secs: u64,
    pub memory_timeout_secs: u64,
    pub text_chunk_threshold: usize,
    pub code_chunk_threshold: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            general_history: 10,
            planning_history: 8,
            document_history: None,
            collector_timeout_secs: 60,
            memory_timeout_secs: 5,
            text_chunk_threshold: 50,
            code_chunk_threshold: 500,
        }
    }
}

/// [document] 段：报告输出目录与下载链接前缀
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DocumentSection {
    pub output_dir: PathBuf,
    /// 静态文件服务对外暴露 output_dir 的路径
    pub link_base: String,
}

impl Default for DocumentSection {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("static/documents"),
            link_base: "/static/documents".to_string(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 QINGLUAN__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 QINGLUAN__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("QINGLUAN")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
