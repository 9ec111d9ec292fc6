//! 请求流水线：分类、两阶段交接、流式分段与顶层编排

pub mod chunker;
pub mod context;
pub mod intent;
pub mod orchestrator;

pub use chunker::StreamChunker;
pub use context::CollectedContext;
pub use intent::{is_planning_request, PLANNING_KEYWORDS};
pub use orchestrator::{ChunkStream, PipelineOrchestrator, PipelineSettings};
