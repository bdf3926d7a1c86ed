//! Concrete [`crate::registry::Tool`] implementations: workspace file
//! editing, long-term memory, and a session todo list.
//!
//! Shell execution, MCP-sourced tools, and other concrete provider
//! integrations are an embedder's concern, not this crate's (§1 non-goal) —
//! register them on a [`crate::registry::ToolRegistry`] the same way these are.

pub mod file;
pub mod memory;
pub mod todo;

pub use file::{ApplyPatchTool, EditFileTool, GlobTool, LsTool, MultieditTool, ReadFileTool, WriteFileTool};
pub use memory::{ListMemoriesTool, RecallTool, RememberTool, SearchMemoriesTool};
pub use todo::{TodoReadTool, TodoWriteTool};
