//! Mock LLM 客户端（用于测试与无凭据的本地运行）
//!
//! 默认回显最后一条 User 消息；可预置按顺序返回的脚本回复或失败，
//! 流式接口把回复按固定字符数切成多段增量，便于测试分段逻辑；
//! 也可以脚本化"先输出一部分再中断"的流。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use parking_lot::Mutex;

use crate::llm::{LlmClient, LlmError, TextStream};
use crate::memory::{Message, Role};

/// 一条脚本项
#[derive(Debug, Clone)]
enum Scripted {
    Reply(String),
    Fail(LlmError),
    /// 流式：先输出 `partial`，再以 `error` 中断；非流式调用直接返回 `error`
    BreakAfter { partial: String, error: LlmError },
}

/// 脚本化 Mock 客户端
#[derive(Debug)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Scripted>>,
    delta_chars: usize,
    delay: Duration,
    calls: AtomicUsize,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            delta_chars: 8,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// 按顺序返回给定回复；脚本耗尽后回到回显模式
    pub fn with_replies<I, S>(self, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script
            .lock()
            .extend(replies.into_iter().map(|r| Scripted::Reply(r.into())));
        self
    }

    /// 追加一条脚本项（回复或失败）
    pub fn push(&self, item: Result<String, LlmError>) {
        let item = match item {
            Ok(reply) => Scripted::Reply(reply),
            Err(e) => Scripted::Fail(e),
        };
        self.script.lock().push_back(item);
    }

    /// 追加一条中途断开的流：输出 `partial` 之后产出 `error`
    pub fn push_broken_stream(&self, partial: impl Into<String>, error: LlmError) {
        self.script.lock().push_back(Scripted::BreakAfter {
            partial: partial.into(),
            error,
        });
    }

    pub fn with_delta_chars(mut self, n: usize) -> Self {
        self.delta_chars = n.max(1);
        self
    }

    /// 每次调用前等待，模拟慢速后端
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 每次调用收到的完整消息列表
    pub fn seen_messages(&self) -> Vec<Vec<Message>> {
        self.seen.lock().clone()
    }

    fn next_item(&self, messages: &[Message]) -> Scripted {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(messages.to_vec());
        if let Some(item) = self.script.lock().pop_front() {
            return item;
        }
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Scripted::Reply(format!("Echo from Mock: {}", last_user))
    }

    fn split(&self, content: &str) -> Vec<Result<String, LlmError>> {
        let chars: Vec<char> = content.chars().collect();
        chars
            .chunks(self.delta_chars)
            .map(|c| Ok(c.iter().collect()))
            .collect()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.next_item(messages) {
            Scripted::Reply(reply) => Ok(reply),
            Scripted::Fail(e) | Scripted::BreakAfter { error: e, .. } => Err(e),
        }
    }

    async fn complete_stream(&self, messages: &[Message]) -> Result<TextStream, LlmError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let deltas = match self.next_item(messages) {
            Scripted::Reply(reply) => self.split(&reply),
            Scripted::Fail(e) => return Err(e),
            Scripted::BreakAfter { partial, error } => {
                let mut deltas = self.split(&partial);
                deltas.push(Err(error));
                deltas
            }
        };
        Ok(Box::pin(stream::iter(deltas)))
    }
}
