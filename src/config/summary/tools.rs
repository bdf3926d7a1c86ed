//! Tool config block for run config summary.
//!
//! Implements [`ConfigSection`](super::ConfigSection). Summarizes the tools
//! registered on a [`crate::registry::ToolRegistry`] at run start: total count
//! and a breakdown by [`crate::registry::ToolCategory`].

use super::ConfigSection;
use crate::registry::{ToolCategory, ToolRegistry};

/// Tool configuration summary: registered tool count and category breakdown.
pub struct ToolConfigSummary {
    pub total: usize,
    pub read: usize,
    pub edit: usize,
    pub execute: usize,
    pub mcp: usize,
}

impl ToolConfigSummary {
    pub fn from_registry(registry: &ToolRegistry) -> Self {
        let descriptors = registry.list();
        let mut summary = Self {
            total: descriptors.len(),
            read: 0,
            edit: 0,
            execute: 0,
            mcp: 0,
        };
        for d in &descriptors {
            match d.category {
                ToolCategory::Read => summary.read += 1,
                ToolCategory::Edit => summary.edit += 1,
                ToolCategory::Execute => summary.execute += 1,
                ToolCategory::Mcp => summary.mcp += 1,
            }
        }
        summary
    }
}

impl ConfigSection for ToolConfigSummary {
    fn section_name(&self) -> &str {
        "Tool config"
    }

    fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("total", self.total.to_string()),
            ("read", self.read.to_string()),
            ("edit", self.edit.to_string()),
            ("execute", self.execute.to_string()),
            ("mcp", self.mcp.to_string()),
        ]
    }
}
