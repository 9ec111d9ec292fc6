//! 工具层：外部工具服务（stdio JSON-RPC）的连接、发现与带超时的调用

pub mod connection;
pub mod executor;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use connection::{ToolConnection, ToolList};
pub use executor::ToolExecutor;
pub use protocol::ToolError;
pub use registry::{ServerTool, Tool, ToolDescriptor, ToolRegistry};
pub use transport::StdioTransport;
