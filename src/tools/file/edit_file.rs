//! Single find-and-replace tool, plus the replacement primitive
//! [`super::MultieditTool`]'s sequential batch reuses.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::registry::{ToolCallContent, ToolCallContext, ToolOutcome, ToolSourceError};
use crate::registry::Tool;

use super::path::resolve_path_under;

/// Tool name for a single find-and-replace edit.
pub const TOOL_EDIT_FILE: &str = "edit_file";

/// Tool that replaces one occurrence (or, with `replaceAll`, every occurrence)
/// of a string in an existing file.
pub struct EditFileTool {
    pub(crate) working_folder: Arc<std::path::PathBuf>,
}

impl EditFileTool {
    pub fn new(working_folder: Arc<std::path::PathBuf>) -> Self {
        Self { working_folder }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        TOOL_EDIT_FILE
    }

    fn spec(&self) -> crate::registry::ToolSpec {
        crate::registry::ToolSpec {
            name: TOOL_EDIT_FILE.to_string(),
            description: Some(
                "Replace text in a file. oldString must match exactly once unless replaceAll \
                 is set. Use Read first."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "File path relative to working folder."
                    },
                    "oldString": { "type": "string" },
                    "newString": { "type": "string" },
                    "replaceAll": { "type": "boolean", "default": false }
                },
                "required": ["path", "oldString", "newString"]
            }),
        }
    }

    async fn call(
        &self,
        args: serde_json::Value,
        _ctx: Option<&ToolCallContext>,
    ) -> Result<ToolOutcome, ToolSourceError> {
        let path_param = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolSourceError::InvalidInput("missing path".to_string()))?;
        let old = args
            .get("oldString")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolSourceError::InvalidInput("missing oldString".to_string()))?;
        let new = args
            .get("newString")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolSourceError::InvalidInput("missing newString".to_string()))?;
        let replace_all = args.get("replaceAll").and_then(|v| v.as_bool()).unwrap_or(false);

        if old == new {
            return Err(ToolSourceError::InvalidInput(
                "oldString and newString must differ".to_string(),
            ));
        }

        let path = resolve_path_under(self.working_folder.as_ref(), path_param)?;
        if path.is_dir() {
            return Err(ToolSourceError::InvalidInput(format!(
                "path is a directory: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ToolSourceError::Transport(format!("failed to read file: {}", e)))?;

        let updated = replace(&content, old, new, replace_all)
            .map_err(ToolSourceError::InvalidInput)?;

        std::fs::write(&path, &updated)
            .map_err(|e| ToolSourceError::Transport(format!("failed to write file: {}", e)))?;

        Ok(ToolOutcome::Result(ToolCallContent {
            text: "ok".to_string(),
        }))
    }
}

/// Replaces `old` with `new` in `content`. With `replace_all` false, `old` must
/// occur exactly once (zero or multiple occurrences is an error); with it
/// true, every occurrence is replaced.
pub fn replace(content: &str, old: &str, new: &str, replace_all: bool) -> Result<String, String> {
    if old.is_empty() {
        return Err("oldString must not be empty".to_string());
    }

    let count = content.matches(old).count();
    if count == 0 {
        return Err(format!("oldString not found: {:?}", truncate(old)));
    }
    if !replace_all && count > 1 {
        return Err(format!(
            "oldString matches {} times; set replaceAll or narrow the match: {:?}",
            count,
            truncate(old)
        ));
    }

    if replace_all {
        Ok(content.replace(old, new))
    } else {
        Ok(content.replacen(old, new, 1))
    }
}

fn truncate(s: &str) -> String {
    if s.len() > 80 {
        format!("{}...", &s[..80])
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_single_unique_match() {
        let out = replace("hello world", "world", "there", false).unwrap();
        assert_eq!(out, "hello there");
    }

    #[test]
    fn errors_when_old_string_missing() {
        assert!(replace("hello world", "xyz", "abc", false).is_err());
    }

    #[test]
    fn errors_when_ambiguous_without_replace_all() {
        assert!(replace("a a a", "a", "b", false).is_err());
    }

    #[test]
    fn replace_all_replaces_every_occurrence() {
        let out = replace("a a a", "a", "b", true).unwrap();
        assert_eq!(out, "b b b");
    }
}
