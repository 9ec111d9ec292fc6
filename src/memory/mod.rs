//! 记忆层：对话轮次、记忆存储（Redis 持久化 + 进程内退化）

pub mod conversation;
pub mod in_process;
pub mod redis_backend;
pub mod store;

pub use conversation::{Message, Role, Turn};
pub use in_process::InProcessBackend;
pub use redis_backend::RedisBackend;
pub use store::{MemoryBackend, MemoryError, MemoryHandle, MemoryStats, MemoryStore};
