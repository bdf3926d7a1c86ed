//! Workspace file tools: read, write, list, glob, patch, multiedit.
//!
//! Every tool here is scoped to a `working_folder` and refuses to operate
//! outside it (see [`path::resolve_path_under`]).

mod apply_patch;
mod edit_file;
mod glob;
mod ls;
mod multiedit;
mod path;
mod read_file;
mod write_file;

pub use apply_patch::{ApplyPatchTool, TOOL_APPLY_PATCH};
pub use edit_file::{EditFileTool, TOOL_EDIT_FILE};
pub use glob::{GlobTool, TOOL_GLOB};
pub use ls::{LsTool, TOOL_LS};
pub use multiedit::{MultieditTool, TOOL_MULTIEDIT};
pub use read_file::{ReadFileTool, TOOL_READ_FILE};
pub use write_file::{TOOL_WRITE_FILE, WriteFileTool};
