//! 工具服务 stdio 传输
//!
//! 子进程 stdin 写入按行分隔的 JSON-RPC 请求；独立的读线程解析 stdout，
//! 按 id 把响应交给等待中的 oneshot。读线程与 std 进程句柄都不绑定任何 tokio 运行时，
//! 因此同一连接可以在不同的桥接运行时之间复用。

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::ToolServerSection;
use crate::tools::protocol::{RpcRequest, RpcResponse, ToolError, ToolResult};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<RpcResponse>>>>;

/// 与单个工具服务进程的连接
pub struct StdioTransport {
    name: String,
    request_id: AtomicU64,
    pending: Pending,
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
}

impl StdioTransport {
    /// 启动工具服务进程并开始读取其输出
    pub fn spawn(server: &ToolServerSection) -> ToolResult<Self> {
        info!(command = %server.command, args = ?server.args, "starting tool server");

        let mut cmd = Command::new(&server.command);
        cmd.args(&server.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        for (key, value) in &server.env {
            cmd.env(key, expand_env(key, value));
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| ToolError::Transport(format!("failed to spawn tool server: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolError::Transport("tool server stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::Transport("tool server stdout unavailable".to_string()))?;

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = pending.clone();
        let name = server.command.clone();
        let reader_name = name.clone();

        std::thread::Builder::new()
            .name("qingluan-tool-reader".to_string())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let line = match line {
                        Ok(l) => l,
                        Err(e) => {
                            warn!(server = %reader_name, error = %e, "tool server read error");
                            break;
                        }
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<RpcResponse>(&line) {
                        Ok(response) => {
                            if let Some(tx) = reader_pending.lock().remove(&response.id) {
                                let _ = tx.send(response);
                            }
                        }
                        // 服务端日志或通知，忽略
                        Err(_) => debug!(server = %reader_name, line = %line, "non-response line"),
                    }
                }
                // 进程退出：唤醒所有等待者
                reader_pending.lock().clear();
                info!(server = %reader_name, "tool server reader exited");
            })
            .map_err(|e| ToolError::Transport(format!("failed to start reader: {e}")))?;

        Ok(Self {
            name,
            request_id: AtomicU64::new(1),
            pending,
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
        })
    }

    /// 发送请求并在 `timeout` 内等待响应的 `result`
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> ToolResult<Value> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let mut request = RpcRequest::new(method, id);
        if let Some(p) = params {
            request = request.with_params(p);
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        if let Err(e) = self.write(&request) {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(r)) => r,
            Ok(Err(_)) => {
                return Err(ToolError::Transport("tool server closed the connection".to_string()))
            }
            Err(_) => {
                self.pending.lock().remove(&id);
                return Err(ToolError::Timeout);
            }
        };

        if let Some(err) = response.error {
            return Err(ToolError::Server {
                code: err.code,
                message: err.message,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// 发送通知（无响应）
    pub fn notify(&self, method: &str) -> ToolResult<()> {
        self.write(&RpcRequest::notification(method))
    }

    fn write(&self, request: &RpcRequest) -> ToolResult<()> {
        let json = serde_json::to_string(request)
            .map_err(|e| ToolError::Protocol(format!("failed to encode request: {e}")))?;
        debug!(server = %self.name, method = %request.method, "-> tool server");
        let mut stdin = self.stdin.lock();
        writeln!(stdin, "{json}")
            .and_then(|_| stdin.flush())
            .map_err(|e| ToolError::Transport(format!("failed to write to tool server: {e}")))
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        let _ = self.child.lock().kill();
    }
}

/// `${VAR}` 形式的值从本进程环境展开，缺失时为空串
fn expand_env(key: &str, value: &str) -> String {
    match value.strip_prefix("${").and_then(|v| v.strip_suffix('}')) {
        Some(var) => std::env::var(var).unwrap_or_else(|_| {
            warn!(var = %var, key = %key, "environment variable not found, using empty string");
            String::new()
        }),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env() {
        std::env::set_var("QINGLUAN_TRANSPORT_TEST_VAR", "secret");
        assert_eq!(expand_env("K", "${QINGLUAN_TRANSPORT_TEST_VAR}"), "secret");
        assert_eq!(expand_env("K", "plain"), "plain");
        assert_eq!(expand_env("K", "${QINGLUAN_DEFINITELY_UNSET_VAR}"), "");
    }

    #[test]
    fn test_spawn_missing_command_fails() {
        let server = ToolServerSection {
            command: "/nonexistent/qingluan-tool-server".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            StdioTransport::spawn(&server),
            Err(ToolError::Transport(_))
        ));
    }
}
