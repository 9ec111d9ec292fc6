//! 流式分段器
//!
//! 把逐段到达的文本增量重新切成适合下发的片段，不在代码块中间切分：
//! - 每遇到一个 ``` 切换一次代码块状态；离开代码块时立即整体下发
//! - 代码块内只在缓冲超过大阈值（默认 500 字符）时下发
//! - 代码块外在缓冲以句末标点或空行结尾、或超过小阈值（默认 50 字符）时下发
//!
//! 单遍、确定性，不丢字符也不重排。

const FENCE_TICKS: usize = 3;

const SENTENCE_ENDINGS: [&str; 7] = [".", "。", "!", "！", "?", "？", "\n\n"];

#[derive(Debug, Clone)]
pub struct StreamChunker {
    buffer: String,
    in_fence: bool,
    /// 缓冲末尾尚未凑满 ``` 的反引号数
    pending_ticks: usize,
    text_threshold: usize,
    code_threshold: usize,
}

impl Default for StreamChunker {
    fn default() -> Self {
        Self::new(50, 500)
    }
}

impl StreamChunker {
    pub fn new(text_threshold: usize, code_threshold: usize) -> Self {
        Self {
            buffer: String::new(),
            in_fence: false,
            pending_ticks: 0,
            text_threshold,
            code_threshold,
        }
    }

    pub fn in_code_fence(&self) -> bool {
        self.in_fence
    }

    /// 送入一段增量，返回零个或多个可下发的片段
    pub fn feed(&mut self, fragment: &str) -> Vec<String> {
        let mut ready = Vec::new();

        for c in fragment.chars() {
            self.buffer.push(c);
            if c != '`' {
                self.pending_ticks = 0;
                continue;
            }
            self.pending_ticks += 1;
            if self.pending_ticks == FENCE_TICKS {
                self.pending_ticks = 0;
                self.in_fence = !self.in_fence;
                if !self.in_fence {
                    ready.push(std::mem::take(&mut self.buffer));
                }
            }
        }

        if self.should_emit() {
            ready.push(std::mem::take(&mut self.buffer));
        }
        ready
    }

    /// 源结束后取出剩余内容
    pub fn flush(&mut self) -> Option<String> {
        self.in_fence = false;
        self.pending_ticks = 0;
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    fn should_emit(&self) -> bool {
        // 不把 ``` 拆到两个片段里
        if self.buffer.is_empty() || self.pending_ticks > 0 {
            return false;
        }
        let len = self.buffer.chars().count();
        if self.in_fence {
            len > self.code_threshold
        } else {
            len > self.text_threshold || SENTENCE_ENDINGS.iter().any(|e| self.buffer.ends_with(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(chunker: &mut StreamChunker, fragments: &[&str]) -> Vec<String> {
        let mut out: Vec<String> = fragments.iter().flat_map(|f| chunker.feed(f)).collect();
        out.extend(chunker.flush());
        out
    }

    /// 原文中各代码块的 (开始 ``` 起点, 结束 ``` 终点) 字节区间
    fn fence_spans(text: &str) -> Vec<(usize, usize)> {
        let marks: Vec<usize> = text.match_indices("```").map(|(i, _)| i).collect();
        marks.chunks(2).filter(|p| p.len() == 2).map(|p| (p[0], p[1] + 3)).collect()
    }

    fn assert_fences_intact(text: &str, chunks: &[String]) {
        assert_eq!(chunks.concat(), text);
        let spans = fence_spans(text);
        let mut offset = 0;
        for chunk in &chunks[..chunks.len().saturating_sub(1)] {
            offset += chunk.len();
            for (open, close) in &spans {
                assert!(
                    !(offset > *open && offset < *close),
                    "boundary {offset} splits fence {open}..{close}: {chunks:?}"
                );
            }
        }
    }

    #[test]
    fn test_split_mid_fence() {
        let input = "Here is code: ```py\nprint(1)\n```done";
        let mut chunker = StreamChunker::default();
        let chunks = run(&mut chunker, &["Here is code: ```py\nprint(1)\n", "```done"]);
        assert_eq!(chunks, vec!["Here is code: ```py\nprint(1)\n```", "done"]);
        assert_fences_intact(input, &chunks);
    }

    #[test]
    fn test_sentence_boundary_emits_outside_fence() {
        let mut chunker = StreamChunker::default();
        assert_eq!(chunker.feed("你好。"), vec!["你好。"]);
        assert!(chunker.feed("今天").is_empty());
        assert_eq!(chunker.feed("天气不错！"), vec!["今天天气不错！"]);
        assert!(chunker.flush().is_none());
    }

    #[test]
    fn test_text_threshold() {
        let mut chunker = StreamChunker::new(5, 500);
        assert!(chunker.feed("abcde").is_empty());
        assert_eq!(chunker.feed("f"), vec!["abcdef"]);
    }

    #[test]
    fn test_code_threshold_inside_fence() {
        let mut chunker = StreamChunker::new(5, 20);
        assert!(chunker.feed("```\nlet a = 1;\n").is_empty());
        assert!(chunker.in_code_fence());
        let out = chunker.feed("let b = 2;\n");
        assert_eq!(out.len(), 1);
        assert!(chunker.in_code_fence());
    }

    #[test]
    fn test_fence_marker_split_across_fragments() {
        let input = "Code:\n```rust\nfn main() {}\n```\nEnd.";
        let fragments = ["Code:\n`", "`", "`rust\nfn main() {}\n``", "`\nEnd."];
        let mut chunker = StreamChunker::new(3, 500);
        let chunks = run(&mut chunker, &fragments);
        assert_fences_intact(input, &chunks);
        assert!(chunks.iter().any(|c| c.contains("fn main() {}") && c.ends_with("```")));
    }

    #[test]
    fn test_every_two_way_split_preserves_text_and_fences() {
        let input = "先看例子。```py\nprint('你好')\n```然后是第二段说明，\
                     足够长以触发阈值切分的普通文本内容内容内容内容内容内容内容内容。\n\n```sh\nls\n```结束!";
        let cuts: Vec<usize> = input.char_indices().map(|(i, _)| i).collect();
        for &a in &cuts {
            for &b in cuts.iter().filter(|&&b| b >= a) {
                let fragments = [&input[..a], &input[a..b], &input[b..]];
                let mut chunker = StreamChunker::default();
                let chunks = run(&mut chunker, &fragments);
                assert_fences_intact(input, &chunks);
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let fragments = ["a. b", "```x", "\ny```", " tail"];
        let a = run(&mut StreamChunker::default(), &fragments);
        let b = run(&mut StreamChunker::default(), &fragments);
        assert_eq!(a, b);
    }
}
