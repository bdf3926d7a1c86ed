//! Per-run coordination handle (§3 "RunContext"): the identity, shared
//! services, and policy a single agent-loop run carries through every step
//! and hands down to any sub-agent or workflow it spawns.
//!
//! The teacher's generic, per-node `RunContext<S>` (config/event-sender/abort,
//! parameterized over a node state type) went with the `StateGraph` compiler
//! it was built for — only its `AbortSignal` survives, in [`crate::graph`].
//! This one is the higher-level object built in its place: it names a
//! thread/resource, carries the shared [`EventBus`] and [`PermissionRules`]
//! for the whole run, and knows how to derive a child context for a nested
//! sub-agent run (§4.E). The run's logger is ambient via `tracing::info_span!`
//! at call sites rather than a stored field here.

use std::path::PathBuf;
use std::sync::Arc;

use crate::event_bus::EventBus;
use crate::graph::AbortSignal;
use crate::memory::Store;
use crate::permissions::PermissionRules;

/// Everything a run needs to execute a step and, if it calls an agent-as-tool
/// or workflow-as-tool, to build the nested run's own context from.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: String,
    pub thread_id: Option<String>,
    pub resource_id: Option<String>,
    pub request_context: serde_json::Value,
    pub events: EventBus,
    pub abort: AbortSignal,
    pub agent_name: String,
    pub memory: Option<Arc<dyn Store>>,
    pub workspace: Option<PathBuf>,
    /// Per-run override of the permission gate's approval requirement; `None`
    /// defers to [`PermissionRules`]'s own category/tool policy.
    pub require_approval: Option<bool>,
    pub permissions: Arc<PermissionRules>,
}

impl RunContext {
    pub fn new(run_id: impl Into<String>, agent_name: impl Into<String>, permissions: Arc<PermissionRules>) -> Self {
        Self {
            run_id: run_id.into(),
            thread_id: None,
            resource_id: None,
            request_context: serde_json::Value::Null,
            events: EventBus::default(),
            abort: AbortSignal::new(),
            agent_name: agent_name.into(),
            memory: None,
            workspace: None,
            require_approval: None,
            permissions,
        }
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>, resource_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn Store>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_workspace(mut self, workspace: PathBuf) -> Self {
        self.workspace = Some(workspace);
        self
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    /// Builds the context a nested sub-agent or workflow run executes under
    /// (§4.E execution rule: "a nested run shares the parent's event stream
    /// and abort signal, but is its own run with its own id"). `memory` and
    /// `permissions` are shared `Arc`s, not copies, so a policy change or a
    /// memory write is visible to parent and child alike; `events`/`abort`
    /// are the same shared handle for the same reason — an abort on the
    /// parent must reach an in-flight nested call.
    pub fn derive_for_subagent(
        &self,
        sub_run_id: impl Into<String>,
        sub_agent_name: impl Into<String>,
        thread_id: Option<String>,
        resource_id: Option<String>,
    ) -> Self {
        Self {
            run_id: sub_run_id.into(),
            thread_id,
            resource_id,
            request_context: self.request_context.clone(),
            events: self.events.clone(),
            abort: self.abort.clone(),
            agent_name: sub_agent_name.into(),
            memory: self.memory.clone(),
            workspace: self.workspace.clone(),
            require_approval: self.require_approval,
            permissions: Arc::clone(&self.permissions),
        }
    }
}
