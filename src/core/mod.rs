//! 核心层：错误分类、同步/异步桥接、会话表

pub mod bridge;
pub mod error;
pub mod registry;

pub use bridge::{BridgedStream, DeltaStream, SyncStreamBridge};
pub use error::AgentError;
pub use registry::{
    AgentBundle, BundleFactory, DefaultBundleFactory, Session, SessionKey, SessionRegistry,
};
