//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / execute）。工具服务发现的每个工具包装为
//! `ServerTool`，以 `ToolDescriptor` 的形式在进程内共享；ToolRegistry 按名查找，
//! ToolExecutor 在调用时加超时并统一转 AgentError。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::protocol::{CallToolResult, RemoteToolSpec};
use crate::tools::transport::StdioTransport;

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（用于 JSON 中的 "tool" 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具
    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 进程内共享的只读工具描述：名称、描述、参数 schema 与调用句柄
#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub handle: Arc<dyn Tool>,
}

impl ToolDescriptor {
    pub fn from_tool(tool: Arc<dyn Tool>) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            input_schema: tool.parameters_schema(),
            handle: tool,
        }
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

/// 工具服务上的一个远程工具：通过共享连接发起 `tools/call`
pub struct ServerTool {
    spec: RemoteToolSpec,
    transport: Arc<StdioTransport>,
    call_timeout: Duration,
}

impl ServerTool {
    pub fn new(spec: RemoteToolSpec, transport: Arc<StdioTransport>, call_timeout: Duration) -> Self {
        Self {
            spec,
            transport,
            call_timeout,
        }
    }
}

#[async_trait]
impl Tool for ServerTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn parameters_schema(&self) -> Value {
        self.spec.input_schema.clone()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let params = serde_json::json!({ "name": self.spec.name, "arguments": args });
        let raw = self
            .transport
            .request("tools/call", Some(params), self.call_timeout)
            .await
            .map_err(|e| e.to_string())?;
        let result: CallToolResult =
            serde_json::from_value(raw).map_err(|e| format!("invalid tool result: {e}"))?;
        let text = result.render_text();
        if result.is_error {
            Err(text)
        } else {
            Ok(text)
        }
    }
}

/// 工具注册表：按名称存储 Arc<dyn Tool>，支持 register / get / execute / tool_names
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_descriptors(descriptors: &[ToolDescriptor]) -> Self {
        let mut registry = Self::new();
        for d in descriptors {
            registry.register(d.handle.clone());
        }
        registry
    }

    /// 按工具自报的名称登记；同名覆盖
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub async fn execute(&self, name: &str, args: Value) -> Result<String, String> {
        let tool = self.tools.get(name).ok_or_else(|| format!("Unknown tool: {name}"))?;
        tool.execute(args).await
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 工具 schema JSON，按名称排序，写入 prompt 的 Available tools 段落
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .tool_names()
            .iter()
            .filter_map(|name| self.tools.get(name).map(|t| (name, t)))
            .map(|(name, tool)| {
                serde_json::json!({
                    "name": name,
                    "description": tool.description(),
                    "parameters": tool.parameters_schema()
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// 原样返回参数的测试工具
    pub(crate) struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the given text back"
        }

        async fn execute(&self, args: Value) -> Result<String, String> {
            args.get("text")
                .and_then(|v| v.as_str())
                .map(String::from)
                .ok_or_else(|| "missing text".to_string())
        }
    }

    #[tokio::test]
    async fn test_registry_from_descriptors() {
        let descriptors = vec![ToolDescriptor::from_tool(Arc::new(EchoTool))];
        let registry = ToolRegistry::from_descriptors(&descriptors);
        assert!(registry.contains("echo"));
        let out = registry
            .execute("echo", serde_json::json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(out, "hi");
        assert!(registry.execute("nope", Value::Null).await.is_err());
        assert!(registry.to_schema_json().contains("Echo the given text back"));
    }
}
