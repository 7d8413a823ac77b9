//! Sandboxed OS-level tools usable without any agent-runtime context:
//! `bash`, `filesystem`/`hub_files`, and `context_search`. Tools that need
//! the running agent's state (schedule, hub_state, browse, skills) live in
//! the gateway crate, which depends on this one.

pub mod bash;
pub mod context_search;
pub mod filesystem;

pub use bash::{run_bash, BashRequest, BashResult};
pub use context_search::{search as context_search, ContextSearchRequest, SearchResult};
pub use filesystem::{execute as execute_file_action, FileAction};
