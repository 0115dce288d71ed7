//! Built-in tools, grouped by the tool groups in the policy glossary: `fs`,
//! `runtime`, `web`, `memory`, `sessions`. Each tool implements [`Tool`] and
//! is registered into an [`AggregateToolSource`] by one of the
//! `crate::tool_source` capability sources.

mod aggregate_source;
mod bash;
mod conversation;
pub mod file;
pub mod memory;
mod registry;
pub mod skill;
pub mod todo;
mod r#trait;
mod web;

pub use aggregate_source::AggregateToolSource;
pub use bash::{BashTool, TOOL_BASH};
pub use conversation::{GetRecentMessagesTool, TOOL_GET_RECENT_MESSAGES};
pub use file::{
    ApplyPatchTool, GlobTool, LsTool, MultieditTool, ReadFileTool, WriteFileTool, TOOL_APPLY_PATCH,
    TOOL_GLOB, TOOL_LS, TOOL_MULTIEDIT, TOOL_READ_FILE, TOOL_WRITE_FILE,
};
pub use memory::{
    ListMemoriesTool, RecallTool, RememberTool, SearchMemoriesTool, TOOL_LIST_MEMORIES, TOOL_RECALL,
    TOOL_REMEMBER, TOOL_SEARCH_MEMORIES,
};
pub use r#trait::Tool;
pub use registry::{ExecuteParams, RateLimiter, ToolRegistry};
pub use skill::{SkillTool, TOOL_SKILL};
pub use todo::{TodoReadTool, TodoWriteTool, TOOL_TODO_READ, TOOL_TODO_WRITE};
pub use web::{WebFetcherTool, TOOL_WEB_FETCHER};
