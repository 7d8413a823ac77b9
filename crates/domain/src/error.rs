//! Shared error taxonomy for the hub daemon (see spec §7).
//!
//! Every fallible path in the hub resolves to one of these variants rather
//! than an ad-hoc string. The variant a caller gets decides how the failure
//! is surfaced: message-local to one client, a connection close, a silent
//! authorization deny, a runner `error` transition, or a logged panic that
//! does not bring the daemon down.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Malformed request, invalid cron syntax, quota violation, unknown
    /// tool, path traversal. Surfaced as a message-local error; never
    /// terminates the connection.
    #[error("validation: {0}")]
    Validation(String),

    /// Missing or invalid auth token. Surfaced as `auth_result{success:false}`;
    /// the connection is closed after the reply is sent.
    #[error("auth: {0}")]
    Auth(String),

    /// A client acted on an agent it is not subscribed to. Callers must
    /// turn this into a silent deny (null/empty response), never a message
    /// that leaks whether the agent exists.
    #[error("authorization: {0}")]
    Authorization(String),

    /// A runner's token or cost budget has been exhausted.
    #[error("budget exhausted: {0}")]
    BudgetExhausted(String),

    /// A tool failed during execution. Carried back to the agent as an
    /// `is_error` tool_result block, never surfaced to the operator.
    #[error("tool error: {0}")]
    Tool(String),

    /// The injected LLM adapter failed (non-2xx, malformed stream, drop).
    #[error("adapter: {0}")]
    Adapter(String),

    /// A per-client write failed; only that client is disconnected.
    #[error("transport: {0}")]
    Transport(String),

    /// Configuration is structurally invalid (startup-time, exit code 2).
    #[error("config: {0}")]
    Config(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// An uncaught panic in a worker task, reported through the normal
    /// error path once caught rather than left to unwind past the task.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn authorization(msg: impl Into<String>) -> Self {
        Self::Authorization(msg.into())
    }

    pub fn tool(msg: impl Into<String>) -> Self {
        Self::Tool(msg.into())
    }
}
