//! Long-term memory tools backed by [`crate::memory::Store`]: remember,
//! recall, list, and search.

mod list_memories;
mod recall;
mod remember;
mod search_memories;

pub use list_memories::{ListMemoriesTool, TOOL_LIST_MEMORIES};
pub use recall::{RecallTool, TOOL_RECALL};
pub use remember::{RememberTool, TOOL_REMEMBER};
pub use search_memories::{SearchMemoriesTool, TOOL_SEARCH_MEMORIES};

use crate::registry::ToolSourceError;

pub(crate) fn map_store_error(e: crate::memory::StoreError) -> ToolSourceError {
    match e {
        crate::memory::StoreError::NotFound(s) => ToolSourceError::NotFound(s),
        crate::memory::StoreError::Storage(s) => ToolSourceError::Transport(s),
    }
}
