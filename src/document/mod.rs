//! 文档生成：渲染协作方接口与文本报告实现
//!
//! 渲染器接收摘要与完整对话，产出文件并返回给用户看的一段消息（含下载链接）。
//! 自带的 `TextFileRenderer` 生成纯文本报告。

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Local;

use crate::core::AgentError;
use crate::memory::{Role, Turn};

/// 一次文档生成请求
#[derive(Debug, Clone)]
pub struct DocumentRequest {
    pub user: String,
    pub summary: String,
    pub conversation: String,
}

#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// 渲染并返回用户可见的结果消息
    async fn render(&self, request: &DocumentRequest) -> Result<String, AgentError>;
}

/// 把对话记录整理为文本
pub fn format_conversation(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| {
            let speaker = match t.role {
                Role::User => "用户",
                Role::Assistant => "助手",
                Role::System => "系统",
            };
            format!("[{}] {}: {}", t.timestamp.format("%Y-%m-%d %H:%M"), speaker, t.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// 文本报告渲染器：写入 output_dir，链接指向 link_base
pub struct TextFileRenderer {
    output_dir: PathBuf,
    link_base: String,
}

impl TextFileRenderer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            link_base: "/static/documents".to_string(),
        }
    }

    pub fn with_link_base(mut self, link_base: impl Into<String>) -> Self {
        self.link_base = link_base.into().trim_end_matches('/').to_string();
        self
    }

    fn file_name(user: &str) -> String {
        let safe: String = user
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let suffix = &uuid::Uuid::new_v4().simple().to_string()[..8];
        if safe.is_empty() {
            format!("旅行规划_{stamp}_{suffix}.txt")
        } else {
            format!("{safe}_旅行规划_{stamp}_{suffix}.txt")
        }
    }
}

#[async_trait]
impl DocumentRenderer for TextFileRenderer {
    async fn render(&self, request: &DocumentRequest) -> Result<String, AgentError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| AgentError::Document(format!("cannot create {}: {e}", self.output_dir.display())))?;

        let name = Self::file_name(&request.user);
        let summary = if request.summary.trim().is_empty() {
            "暂无总结"
        } else {
            request.summary.as_str()
        };
        let content = format!(
            "智能旅行规划报告\n生成时间: {}\n\nAI总结报告:\n{}\n\n完整对话记录:\n{}\n\n本报告由青鸾向导AI旅行规划系统生成\n",
            Local::now().format("%Y年%m月%d日 %H:%M:%S"),
            summary,
            request.conversation
        );

        let path = self.output_dir.join(&name);
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| AgentError::Document(format!("cannot write {}: {e}", path.display())))?;
        tracing::info!(path = %path.display(), "document written");

        let link = format!("{}/{}", self.link_base, name);
        Ok(format!(
            "报告已生成，您可以通过以下链接下载: <a href='{link}' target='_blank'>下载文本文件</a>"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_text_report_written_with_link() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = TextFileRenderer::new(dir.path().join("docs"));
        let request = DocumentRequest {
            user: "alice@example.com".to_string(),
            summary: "三日游总结".to_string(),
            conversation: format_conversation(&[Turn::user("去杭州"), Turn::assistant("好的")]),
        };

        let message = renderer.render(&request).await.unwrap();
        assert!(message.contains("/static/documents/alice_example_com_旅行规划_"));

        let entries: Vec<_> = std::fs::read_dir(dir.path().join("docs")).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let text = std::fs::read_to_string(entries[0].as_ref().unwrap().path()).unwrap();
        assert!(text.contains("三日游总结"));
        assert!(text.contains("用户: 去杭州"));
        assert!(text.contains("助手: 好的"));
    }

    #[tokio::test]
    async fn test_empty_summary_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = TextFileRenderer::new(dir.path());
        let request = DocumentRequest {
            user: String::new(),
            summary: "  ".to_string(),
            conversation: String::new(),
        };
        renderer.render(&request).await.unwrap();
        let path = std::fs::read_dir(dir.path()).unwrap().next().unwrap().unwrap().path();
        assert!(std::fs::read_to_string(path).unwrap().contains("暂无总结"));
    }
}
