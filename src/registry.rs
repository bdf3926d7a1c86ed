//! Tool Registry & Dispatch (§4.C).
//!
//! Generalizes the old infallible `Tool::call` into one that can also suspend a
//! run for human input: [`ToolOutcome::Suspend`] lets a tool executor hand
//! control back to the agent loop instead of returning a result, which
//! [`crate::bridge`] uses for sub-agent/workflow tools and [`crate::permissions`]
//! uses for approval gates.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::event_bus::EventBus;
use crate::graph::AbortSignal;
use crate::memory::Store;
use crate::message::Message;

/// Legacy-shaped tool spec: name, human description, and JSON input schema.
/// Kept distinct from [`ToolDescriptor`] because a [`Tool`] impl only knows its
/// own shape, not where the registry sourced it from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

/// Coarse permission bucket a tool falls into (§4.H consults this).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Read,
    Edit,
    Execute,
    Mcp,
}

/// Where a tool was sourced from, for provenance/telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolSourceKind {
    Assigned,
    Memory,
    Workspace,
    Toolset,
    Client,
    Agent,
    Workflow,
}

/// Registry-level view of a tool: its wire schema plus the metadata the agent
/// loop and permission gate need that the [`Tool`] impl itself doesn't carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub id: String,
    pub input_schema: serde_json::Value,
    pub output_schema: Option<serde_json::Value>,
    pub requires_approval: bool,
    pub category: ToolCategory,
    pub source: ToolSourceKind,
}

/// Text result of a tool call, what gets merged back into the owning
/// [`crate::message::ToolCallPart`] via `apply_result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallContent {
    pub text: String,
}

/// What a [`Tool::call`] produced: either a finished result, or a request to
/// suspend the run (sub-agent/workflow awaiting a nested run, or an approval
/// gate awaiting a decision).
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    Result(ToolCallContent),
    Suspend { reason: String, payload: serde_json::Value },
}

impl ToolOutcome {
    pub fn is_suspend(&self) -> bool {
        matches!(self, ToolOutcome::Suspend { .. })
    }
}

/// Errors a [`Tool::call`] or the registry itself can produce. Distinct from
/// [`AgentError`]: these are converted to `tool-result{is_error: true}` parts by
/// the dispatch layer rather than aborting the run (see [`crate::error`]).
#[derive(Debug, thiserror::Error)]
pub enum ToolSourceError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Per-call context a tool executor may read: recent conversation, session
/// identity, and the run's abort signal.
///
/// `events`/`memory` are what [`crate::bridge`]'s agent-as-tool and
/// workflow-as-tool executors need to satisfy §4.E's execution rules: forward
/// stream chunks to the parent's writer (`events`) and save/restore the
/// parent's memory slot around the nested run (`memory`). Every field here
/// besides `recent_messages` is a cheap, shared handle, so cloning this
/// context to build a nested run's context never copies state — it shares it,
/// which is what lets a parent abort reach an in-flight sub-agent call.
#[derive(Clone, Default)]
pub struct ToolCallContext {
    pub recent_messages: Vec<Message>,
    pub thread_id: Option<String>,
    pub user_id: Option<String>,
    pub abort: Option<AbortSignal>,
    pub events: Option<EventBus>,
    pub memory: Option<Arc<dyn Store>>,
}

impl ToolCallContext {
    pub fn new(recent_messages: Vec<Message>) -> Self {
        Self {
            recent_messages,
            thread_id: None,
            user_id: None,
            abort: None,
            events: None,
            memory: None,
        }
    }

    pub fn with_abort(mut self, abort: AbortSignal) -> Self {
        self.abort = Some(abort);
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn Store>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.as_ref().is_some_and(|a| a.is_aborted())
    }
}

/// A dispatchable tool. Implementors never fail the whole run on error: a
/// failed call returns `Err(ToolSourceError)`, which dispatch turns into an
/// `is_error: true` tool result rather than propagating.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn spec(&self) -> ToolSpec;

    async fn call(
        &self,
        args: serde_json::Value,
        ctx: Option<&ToolCallContext>,
    ) -> Result<ToolOutcome, ToolSourceError>;
}

static TOOL_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]{0,62}$").unwrap());

const MAX_TOOL_NAME_LEN: usize = 63;

/// Normalizes a raw tool name to the wire-safe alphabet, truncating to 63
/// characters. Names that already match are returned unchanged.
pub fn normalize_tool_name(raw: &str) -> String {
    if TOOL_NAME_RE.is_match(raw) {
        return raw.to_string();
    }
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    let cleaned = if cleaned.chars().next().is_some_and(|c| c.is_ascii_digit() || c == '-') {
        format!("_{cleaned}")
    } else {
        cleaned
    };
    cleaned.chars().take(MAX_TOOL_NAME_LEN).collect()
}

/// Holds every tool available to a run and dispatches calls by normalized name.
///
/// A single registry rather than a layered aggregation of per-source
/// registries — sources differ only in their [`ToolSourceKind`] provenance.
#[derive(Default)]
pub struct ToolRegistry {
    tools: DashMap<String, Arc<dyn Tool>>,
    descriptors: DashMap<String, ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool under its normalized name. A 63-char truncation
    /// collision with an already-registered tool is an [`AgentError::ToolNameCollision`].
    pub fn register(
        &self,
        tool: Arc<dyn Tool>,
        category: ToolCategory,
        source: ToolSourceKind,
        requires_approval: bool,
    ) -> Result<(), AgentError> {
        let name = normalize_tool_name(tool.name());
        if self.tools.contains_key(&name) {
            return Err(AgentError::ToolNameCollision(name));
        }
        let spec = tool.spec();
        self.descriptors.insert(
            name.clone(),
            ToolDescriptor {
                id: name.clone(),
                input_schema: spec.input_schema,
                output_schema: None,
                requires_approval,
                category,
                source,
            },
        );
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Registers a tool under its normalized name, replacing any existing
    /// entry of the same name instead of erroring. This is the "later
    /// entries override earlier on name collision" half of §4.C's assembly
    /// order — [`ToolRegistry::register`] stays strict, for callers that want
    /// a collision within a single source to be a programmer error.
    pub fn register_or_override(
        &self,
        tool: Arc<dyn Tool>,
        category: ToolCategory,
        source: ToolSourceKind,
        requires_approval: bool,
    ) {
        let name = normalize_tool_name(tool.name());
        let spec = tool.spec();
        self.descriptors.insert(
            name.clone(),
            ToolDescriptor {
                id: name.clone(),
                input_schema: spec.input_schema,
                output_schema: None,
                requires_approval,
                category,
                source,
            },
        );
        self.tools.insert(name, tool);
    }

    /// Assembles the effective per-run toolset (§4.C "Sources, assembled in
    /// this order") from ordered `(tool, category, source, requires_approval)`
    /// entries. Callers pass entries pre-ordered assigned, memory, toolsets,
    /// client, sub-agent, workflow, workspace; later entries in the list
    /// override earlier ones whose normalized name collides, via
    /// [`ToolRegistry::register_or_override`].
    pub fn assemble(entries: Vec<(Arc<dyn Tool>, ToolCategory, ToolSourceKind, bool)>) -> Self {
        let registry = Self::new();
        for (tool, category, source, requires_approval) in entries {
            registry.register_or_override(tool, category, source, requires_approval);
        }
        registry
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|e| Arc::clone(e.value()))
    }

    pub fn descriptor(&self, name: &str) -> Option<ToolDescriptor> {
        self.descriptors.get(name).map(|e| e.value().clone())
    }

    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.descriptors.iter().map(|e| e.value().clone()).collect()
    }

    /// Looks up and calls a tool, mapping an unknown name to [`AgentError::UnknownTool`].
    /// Execution failures stay as `Ok(Err(ToolSourceError))` so the caller can
    /// turn them into an `is_error: true` tool-result part.
    pub async fn dispatch(
        &self,
        name: &str,
        args: serde_json::Value,
        ctx: Option<&ToolCallContext>,
    ) -> Result<Result<ToolOutcome, ToolSourceError>, AgentError> {
        let tool = self.get(name).ok_or_else(|| AgentError::UnknownTool(name.to_string()))?;
        Ok(tool.call(args, ctx).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "echo".into(),
                description: None,
                input_schema: serde_json::json!({"type": "object"}),
            }
        }

        async fn call(
            &self,
            args: serde_json::Value,
            _ctx: Option<&ToolCallContext>,
        ) -> Result<ToolOutcome, ToolSourceError> {
            Ok(ToolOutcome::Result(ToolCallContent { text: args.to_string() }))
        }
    }

    #[test]
    fn normalize_accepts_already_valid_names() {
        assert_eq!(normalize_tool_name("read_file"), "read_file");
    }

    #[test]
    fn normalize_replaces_invalid_characters() {
        assert_eq!(normalize_tool_name("my tool!"), "my_tool_");
    }

    #[test]
    fn normalize_truncates_to_63_chars() {
        let long = "a".repeat(100);
        assert_eq!(normalize_tool_name(&long).len(), 63);
    }

    #[tokio::test]
    async fn register_then_dispatch_roundtrips() {
        let registry = ToolRegistry::new();
        registry
            .register(Arc::new(Echo), ToolCategory::Read, ToolSourceKind::Workspace, false)
            .unwrap();
        let outcome = registry
            .dispatch("echo", serde_json::json!({"a": 1}), None)
            .await
            .unwrap()
            .unwrap();
        match outcome {
            ToolOutcome::Result(c) => assert_eq!(c.text, "{\"a\":1}"),
            _ => panic!("expected result"),
        }
    }

    #[test]
    fn duplicate_registration_is_a_collision() {
        let registry = ToolRegistry::new();
        registry
            .register(Arc::new(Echo), ToolCategory::Read, ToolSourceKind::Workspace, false)
            .unwrap();
        let err = registry
            .register(Arc::new(Echo), ToolCategory::Read, ToolSourceKind::Workspace, false)
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolNameCollision(_)));
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_errors() {
        let registry = ToolRegistry::new();
        let err = registry.dispatch("nope", serde_json::json!({}), None).await.unwrap_err();
        assert!(matches!(err, AgentError::UnknownTool(_)));
    }

    struct Echo2;

    #[async_trait]
    impl Tool for Echo2 {
        fn name(&self) -> &str {
            "echo"
        }

        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "echo".into(),
                description: None,
                input_schema: serde_json::json!({"type": "object"}),
            }
        }

        async fn call(
            &self,
            _args: serde_json::Value,
            _ctx: Option<&ToolCallContext>,
        ) -> Result<ToolOutcome, ToolSourceError> {
            Ok(ToolOutcome::Result(ToolCallContent { text: "from-echo2".into() }))
        }
    }

    #[test]
    fn register_or_override_replaces_earlier_registration() {
        let registry = ToolRegistry::new();
        registry.register_or_override(Arc::new(Echo), ToolCategory::Read, ToolSourceKind::Assigned, false);
        registry.register_or_override(Arc::new(Echo2), ToolCategory::Read, ToolSourceKind::Workspace, false);
        assert_eq!(registry.descriptor("echo").unwrap().source, ToolSourceKind::Workspace);
    }

    #[tokio::test]
    async fn assemble_lets_later_source_override_earlier_on_name_collision() {
        let registry = ToolRegistry::assemble(vec![
            (Arc::new(Echo), ToolCategory::Read, ToolSourceKind::Assigned, false),
            (Arc::new(Echo2), ToolCategory::Read, ToolSourceKind::Workspace, false),
        ]);
        let outcome = registry.dispatch("echo", serde_json::json!({}), None).await.unwrap().unwrap();
        match outcome {
            ToolOutcome::Result(c) => assert_eq!(c.text, "from-echo2"),
            _ => panic!("expected result"),
        }
        assert_eq!(registry.descriptor("echo").unwrap().source, ToolSourceKind::Workspace);
    }
}
