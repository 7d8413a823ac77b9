pub mod agent;
pub mod config;
pub mod error;
pub mod stream;
pub mod tool;

pub use agent::{AgentConfig, NetworkMode, NetworkPolicy, RunnerState, SandboxPermissions, TurnUsage};
pub use config::Config;
pub use error::{Error, Result};
pub use stream::{BoxStream, StopReason, StreamEvent, Usage};
pub use tool::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};
