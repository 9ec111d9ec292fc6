//! 工具服务连接（进程级、惰性、记忆化）
//!
//! 第一次 `load_tools` 时启动工具服务、握手并拉取工具目录；结果（包括失败时的空列表）
//! 被永久记忆，之后的调用直接返回同一份列表，不会重试。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::config::{ToolServerSection, ToolsSection};
use crate::core::AgentError;
use crate::tools::protocol::{ListToolsResult, PROTOCOL_VERSION};
use crate::tools::transport::StdioTransport;
use crate::tools::{ServerTool, ToolDescriptor};

/// 进程内共享的工具列表
pub type ToolList = Arc<[ToolDescriptor]>;

pub struct ToolConnection {
    server: Option<ToolServerSection>,
    handshake_timeout: Duration,
    call_timeout: Duration,
    tools: OnceCell<ToolList>,
    attempts: AtomicUsize,
}

impl ToolConnection {
    pub fn new(cfg: &ToolsSection) -> Self {
        Self {
            server: cfg.server.clone(),
            handshake_timeout: Duration::from_secs(cfg.handshake_timeout_secs),
            call_timeout: Duration::from_secs(cfg.call_timeout_secs),
            tools: OnceCell::new(),
            attempts: AtomicUsize::new(0),
        }
    }

    /// 不连接任何工具服务
    pub fn disabled() -> Self {
        Self::new(&ToolsSection::default())
    }

    /// 返回工具列表；首次调用时连接，失败时记忆空列表
    pub async fn load_tools(&self) -> ToolList {
        self.tools
            .get_or_init(|| async {
                let server = match &self.server {
                    Some(s) => s,
                    None => {
                        info!("no tool server configured, running without tools");
                        return ToolList::from(Vec::new());
                    }
                };
                self.attempts.fetch_add(1, Ordering::SeqCst);
                match self.connect(server).await {
                    Ok(tools) => {
                        info!(count = tools.len(), "tool catalogue loaded");
                        tools
                    }
                    Err(e) => {
                        warn!(error = %e, "tool server unavailable, tools disabled for this process");
                        ToolList::from(Vec::new())
                    }
                }
            })
            .await
            .clone()
    }

    /// 已加载的列表（尚未加载时为 None）
    pub fn loaded(&self) -> Option<ToolList> {
        self.tools.get().cloned()
    }

    /// 启动工具服务的次数（0 或 1）
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    async fn connect(&self, server: &ToolServerSection) -> Result<ToolList, AgentError> {
        let unavailable = |e: crate::tools::ToolError| AgentError::ToolUnavailable(e.to_string());

        let transport = Arc::new(StdioTransport::spawn(server).map_err(unavailable)?);

        let init_params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": "qingluan", "version": env!("CARGO_PKG_VERSION") }
        });
        transport
            .request("initialize", Some(init_params), self.handshake_timeout)
            .await
            .map_err(unavailable)?;
        transport
            .notify("notifications/initialized")
            .map_err(unavailable)?;

        let raw = transport
            .request("tools/list", None, self.handshake_timeout)
            .await
            .map_err(unavailable)?;
        let list: ListToolsResult = serde_json::from_value(raw)
            .map_err(|e| AgentError::ToolUnavailable(format!("invalid tools/list result: {e}")))?;

        let tools: Vec<ToolDescriptor> = list
            .tools
            .into_iter()
            .map(|spec| {
                ToolDescriptor::from_tool(Arc::new(ServerTool::new(
                    spec,
                    transport.clone(),
                    self.call_timeout,
                )))
            })
            .collect();
        Ok(tools.into())
    }
}
