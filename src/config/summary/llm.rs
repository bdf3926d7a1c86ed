//! LLM config block for run config summary.

use super::ConfigSection;

/// LLM configuration summary: model, tool choice mode, streaming.
pub struct LlmConfigSummary {
    pub model: String,
    pub tool_choice: String,
    pub streaming: bool,
}

impl ConfigSection for LlmConfigSummary {
    fn section_name(&self) -> &str {
        "LLM config"
    }

    fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("model", self.model.clone()),
            ("tool_choice", self.tool_choice.clone()),
            ("streaming", self.streaming.to_string()),
        ]
    }
}
