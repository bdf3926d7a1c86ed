//! Sub-agent & Workflow Bridge (§4.E): lets one agent invoke another agent or
//! a workflow as if it were an ordinary tool, while forwarding the parent's
//! event stream, memory, and abort signal into the nested run.
//!
//! An agent-as-tool wraps a peer [`AgentLoop`] run behind the same `{task}`-in,
//! delegate-via-`invoke` shape an ordinary tool call has, with the tool name
//! derived from the agent's own name; generalized here to carry
//! `thread_id`/`resource_id` overrides and the suspend-propagation shape
//! §4.E names. Workflow-as-tool has no direct precedent; it's built by
//! extension from the same shape, substituting a [`Workflow`] run for an
//! [`AgentLoop`] run.
//!
//! Per [`crate::registry::ToolCallContext`]'s own doc comment, these
//! executors are built against the narrower per-call context a [`Tool`]
//! receives (`events`/`memory`/`abort`), not the full [`crate::run_context::RunContext`]
//! the agent loop itself runs under — a [`Tool`] is dispatched from inside
//! `ToolRegistry::dispatch` and never sees the parent's `RunContext` directly.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::agent_loop::{AgentLoop, AgentRunOutcome};
use crate::message_store::{add_user_text, MessageStore};
use crate::permissions::PermissionRules;
use crate::registry::{Tool, ToolCallContent, ToolCallContext, ToolOutcome, ToolSourceError, ToolSpec};
use crate::thread::Thread;

/// Input schema synthesized for every agent-as-tool (§4.E).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentToolInput {
    pub prompt: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub max_steps: Option<u32>,
}

/// Output schema for a completed agent-as-tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentToolOutput {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_agent_thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_agent_resource_id: Option<String>,
}

/// Derives the sub-agent's `thread_id`/`resource_id` per §4.E execution rule
/// 2: an explicit override from the input wins; otherwise synthesize one from
/// the sub-agent's name and the parent's resource/agent identity.
fn derive_sub_identity(
    input: &AgentToolInput,
    sub_agent_name: &str,
    parent_resource_id: Option<&str>,
    parent_agent_name: &str,
) -> (String, String) {
    let resource_id = input
        .resource_id
        .clone()
        .unwrap_or_else(|| format!("{parent_agent_name}-{sub_agent_name}"));
    let thread_id = input
        .thread_id
        .clone()
        .unwrap_or_else(|| format!("{sub_agent_name}-{}", parent_resource_id.unwrap_or(&resource_id)));
    (thread_id, resource_id)
}

/// Wraps one peer [`AgentLoop`] as a [`Tool`] another agent can call.
pub struct AgentAsTool {
    sub_agent_name: String,
    parent_agent_name: String,
    agent: Arc<AgentLoop>,
    permissions: Arc<PermissionRules>,
}

impl AgentAsTool {
    pub fn new(
        parent_agent_name: impl Into<String>,
        agent: Arc<AgentLoop>,
        permissions: Arc<PermissionRules>,
    ) -> Self {
        Self {
            sub_agent_name: agent.agent_name.clone(),
            parent_agent_name: parent_agent_name.into(),
            agent,
            permissions,
        }
    }
}

#[async_trait]
impl Tool for AgentAsTool {
    fn name(&self) -> &str {
        &self.sub_agent_name
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.sub_agent_name.clone(),
            description: Some(format!("Delegates a task to the '{}' agent.", self.sub_agent_name)),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "prompt": { "type": "string" },
                    "thread_id": { "type": "string" },
                    "resource_id": { "type": "string" },
                    "instructions": { "type": "string" },
                    "max_steps": { "type": "integer" }
                },
                "required": ["prompt"]
            }),
        }
    }

    async fn call(
        &self,
        args: serde_json::Value,
        ctx: Option<&ToolCallContext>,
    ) -> Result<ToolOutcome, ToolSourceError> {
        let input: AgentToolInput =
            serde_json::from_value(args).map_err(|e| ToolSourceError::InvalidInput(e.to_string()))?;
        let ctx = ctx.cloned().unwrap_or_default();

        let (thread_id, resource_id) =
            derive_sub_identity(&input, &self.sub_agent_name, ctx.user_id.as_deref(), &self.parent_agent_name);

        // Execution rule 1 + 6: save the parent's active-thread memory slot
        // and restore it once the nested run finishes, success or error.
        let memory_slot_key = vec!["active_thread".to_string()];
        let saved_slot = if let Some(memory) = &ctx.memory {
            memory.get(&memory_slot_key, &self.parent_agent_name).await.ok().flatten()
        } else {
            None
        };
        if let Some(memory) = &ctx.memory {
            let _ = memory
                .put(&memory_slot_key, &self.parent_agent_name, json!({ "thread_id": thread_id }))
                .await;
        }

        let run_id = crate::message::new_message_id();
        let sub_run_id = format!("{}-{}", self.sub_agent_name, run_id);

        let mut run_ctx = crate::run_context::RunContext::new(sub_run_id.clone(), self.sub_agent_name.clone(), Arc::clone(&self.permissions))
            .with_thread(thread_id.clone(), resource_id.clone());
        if let Some(events) = &ctx.events {
            run_ctx = run_ctx.with_events(events.clone());
        }
        if let Some(memory) = &ctx.memory {
            run_ctx = run_ctx.with_memory(Arc::clone(memory));
        }
        if let Some(abort) = &ctx.abort {
            run_ctx.abort = abort.clone();
        }

        let mut store = MessageStore::new();
        if let Some(instructions) = &input.instructions {
            store.add_system(crate::message::Message::system(instructions.clone()), None);
        }
        let _ = add_user_text(&mut store, input.prompt.clone());
        let mut thread = Thread::new(thread_id.clone(), resource_id.clone());

        if let Some(events) = &ctx.events {
            events.publish(crate::event_bus::HarnessEvent::SubagentStart {
                call_id: sub_run_id.clone(),
                agent_name: self.sub_agent_name.clone(),
            });
        }

        let agent = if let Some(max_steps) = input.max_steps {
            // Per-call override: clone the fixed config with a different bound
            // rather than mutating the shared `Arc<AgentLoop>`.
            Arc::new(AgentLoop {
                agent_name: self.agent.agent_name.clone(),
                llm: Arc::clone(&self.agent.llm),
                tools: Arc::clone(&self.agent.tools),
                om: self.agent.om.clone(),
                max_steps,
            })
        } else {
            Arc::clone(&self.agent)
        };

        let result = agent.run_step_loop(&mut store, &mut thread, &run_ctx).await;

        if let Some(events) = &ctx.events {
            events.publish(crate::event_bus::HarnessEvent::SubagentEnd { call_id: sub_run_id.clone() });
        }

        // Execution rule 6: restore the parent's slot regardless of outcome.
        if let Some(memory) = &ctx.memory {
            match saved_slot {
                Some(item) => {
                    let _ = memory.put(&memory_slot_key, &self.parent_agent_name, item.value).await;
                }
                None => {
                    let _ = memory.delete(&memory_slot_key, &self.parent_agent_name).await;
                }
            }
        }

        match result {
            Ok(AgentRunOutcome::Finished { .. }) => {
                let text = store
                    .response()
                    .into_iter()
                    .rev()
                    .find(|m| m.role == crate::message::Role::Assistant)
                    .map(|m| m.as_text())
                    .unwrap_or_default();
                let output = AgentToolOutput {
                    text,
                    sub_agent_thread_id: Some(thread_id),
                    sub_agent_resource_id: Some(resource_id),
                };
                Ok(ToolOutcome::Result(ToolCallContent {
                    text: serde_json::to_string(&output).unwrap_or_default(),
                }))
            }
            // Execution rule 5: re-suspend the parent carrying the sub-run's
            // id so the outer resume routes to this inner run.
            Ok(AgentRunOutcome::Suspended { snapshot, .. }) => Ok(ToolOutcome::Suspend {
                reason: "sub_agent_suspended".to_string(),
                payload: json!({
                    "is_agent_suspend": true,
                    "run_id": snapshot.run_id,
                    "thread_id": thread_id,
                    "resource_id": resource_id,
                    "pending": snapshot.pending,
                }),
            }),
            Err(err) => Err(ToolSourceError::Transport(err.to_string())),
        }
    }
}

/// A workflow step's declared input schema plus, optionally, its initial
/// state schema — what an individual workflow step expects, in the shape
/// [`WorkflowAsTool`] extends into its own call signature.
pub trait Workflow: Send + Sync {
    fn name(&self) -> &str;
    fn input_schema(&self) -> serde_json::Value;

    /// Runs the workflow to completion or suspension. A suspended workflow
    /// returns the step path (dot-separated keys naming the nested step that
    /// suspended) alongside its payload, per §4.E "the bridge walks the
    /// suspended step path to obtain the resume schema for that leaf".
    fn run<'a>(
        &'a self,
        input: serde_json::Value,
        ctx: &'a crate::run_context::RunContext,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<WorkflowOutcome, crate::error::AgentError>> + Send + 'a>>;
}

/// What a [`Workflow::run`] call produced.
#[derive(Debug, Clone)]
pub enum WorkflowOutcome {
    Result(serde_json::Value),
    Suspended { step_path: Vec<String>, payload: serde_json::Value },
}

/// Wraps a [`Workflow`] as a [`Tool`]. Analogous to [`AgentAsTool`] but the
/// output is `{result, run_id} | {error, run_id}` per §4.E, and a suspension
/// carries the walked step path instead of a sub-run id.
pub struct WorkflowAsTool {
    workflow: Arc<dyn Workflow>,
    permissions: Arc<PermissionRules>,
}

impl WorkflowAsTool {
    pub fn new(workflow: Arc<dyn Workflow>, permissions: Arc<PermissionRules>) -> Self {
        Self { workflow, permissions }
    }

    /// Walks a suspended step path to find the leaf resume schema. If a
    /// named key is missing at any level, falls back to the outermost
    /// workflow as the resumer and logs a warning (§9 "Workflow-suspend path
    /// walking": "the source logs a warning and treats the outermost
    /// workflow as the resumer" — preserved here rather than erroring).
    fn resolve_resume_leaf<'a>(&self, step_path: &'a [String]) -> &'a str {
        match step_path.last() {
            Some(leaf) if !leaf.is_empty() => leaf,
            _ => {
                tracing::warn!(workflow = self.workflow.name(), "suspended step path empty; resuming outermost workflow");
                self.workflow.name()
            }
        }
    }
}

#[async_trait]
impl Tool for WorkflowAsTool {
    fn name(&self) -> &str {
        self.workflow.name()
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.workflow.name().to_string(),
            description: Some(format!("Runs the '{}' workflow.", self.workflow.name())),
            input_schema: self.workflow.input_schema(),
        }
    }

    async fn call(
        &self,
        args: serde_json::Value,
        ctx: Option<&ToolCallContext>,
    ) -> Result<ToolOutcome, ToolSourceError> {
        let ctx = ctx.cloned().unwrap_or_default();
        let run_id = format!("{}-{}", self.workflow.name(), crate::message::new_message_id());

        let mut run_ctx =
            crate::run_context::RunContext::new(run_id.clone(), self.workflow.name(), Arc::clone(&self.permissions));
        if let Some(thread_id) = &ctx.thread_id {
            run_ctx = run_ctx.with_thread(thread_id.clone(), ctx.user_id.clone().unwrap_or_default());
        }
        if let Some(events) = &ctx.events {
            run_ctx = run_ctx.with_events(events.clone());
        }
        if let Some(memory) = &ctx.memory {
            run_ctx = run_ctx.with_memory(Arc::clone(memory));
        }
        if let Some(abort) = &ctx.abort {
            run_ctx.abort = abort.clone();
        }

        let outcome = self
            .workflow
            .run(args, &run_ctx)
            .await
            .map_err(|e| ToolSourceError::Transport(e.to_string()))?;

        match outcome {
            WorkflowOutcome::Result(result) => Ok(ToolOutcome::Result(ToolCallContent {
                text: json!({ "result": result, "run_id": run_id }).to_string(),
            })),
            WorkflowOutcome::Suspended { step_path, payload } => {
                let leaf = self.resolve_resume_leaf(&step_path);
                Ok(ToolOutcome::Suspend {
                    reason: format!("workflow_suspended_at_{leaf}"),
                    payload: json!({ "run_id": run_id, "step_path": step_path, "payload": payload }),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;
    use crate::registry::{ToolCategory, ToolRegistry, ToolSourceKind};

    fn permissions() -> Arc<PermissionRules> {
        Arc::new(PermissionRules::new())
    }

    fn sub_agent(text: &str) -> Arc<AgentLoop> {
        Arc::new(AgentLoop::new("explorer", Arc::new(MockLlm::fixed_text(text)), Arc::new(ToolRegistry::new())))
    }

    #[test]
    fn derive_sub_identity_uses_override_when_present() {
        let input = AgentToolInput {
            prompt: "go".into(),
            thread_id: Some("t-override".into()),
            resource_id: Some("r-override".into()),
            instructions: None,
            max_steps: None,
        };
        let (thread_id, resource_id) = derive_sub_identity(&input, "explorer", Some("parent-r"), "main");
        assert_eq!(thread_id, "t-override");
        assert_eq!(resource_id, "r-override");
    }

    #[test]
    fn derive_sub_identity_synthesizes_when_absent() {
        let input = AgentToolInput {
            prompt: "go".into(),
            thread_id: None,
            resource_id: None,
            instructions: None,
            max_steps: None,
        };
        let (_thread_id, resource_id) = derive_sub_identity(&input, "explorer", Some("parent-r"), "main");
        assert_eq!(resource_id, "main-explorer");
    }

    /// Seed scenario (a)-adjacent: a sub-agent with no tool calls finishes
    /// and reports its text plus the derived thread/resource ids.
    #[tokio::test]
    async fn agent_as_tool_runs_sub_agent_to_completion() {
        let tool = AgentAsTool::new("main", sub_agent("42"), permissions());
        let ctx = ToolCallContext::new(vec![]);
        let out = tool
            .call(json!({"prompt": "what is 6*7?"}), Some(&ctx))
            .await
            .unwrap();
        match out {
            ToolOutcome::Result(content) => {
                let parsed: AgentToolOutput = serde_json::from_str(&content.text).unwrap();
                assert_eq!(parsed.text, "42");
                assert!(parsed.sub_agent_thread_id.is_some());
            }
            _ => panic!("expected result"),
        }
    }

    /// Seed scenario (f): a sub-agent whose own tool requires approval
    /// suspends, and the bridge re-suspends the parent carrying the
    /// sub-run's id so the outer resume can route the decision inward.
    #[tokio::test]
    async fn agent_as_tool_propagates_sub_agent_suspension() {
        let registry = ToolRegistry::new();
        registry
            .register(
                Arc::new(crate::tools::todo::TodoReadTool::new(std::env::temp_dir())),
                ToolCategory::Execute,
                ToolSourceKind::Workspace,
                true,
            )
            .unwrap();
        let script = vec![crate::message::Message::new(
            crate::message::Role::Assistant,
            vec![crate::message::Part::new(crate::message::PartKind::ToolCall(
                crate::message::ToolCallPart::partial("call_1", "todo_read"),
            ))],
        )];
        let sub = Arc::new(AgentLoop::new("explorer", Arc::new(MockLlm::scripted(script)), Arc::new(registry)));
        let tool = AgentAsTool::new("main", sub, permissions());
        let ctx = ToolCallContext::new(vec![]);
        let out = tool.call(json!({"prompt": "explore"}), Some(&ctx)).await.unwrap();
        match out {
            ToolOutcome::Suspend { payload, .. } => {
                assert_eq!(payload["is_agent_suspend"], json!(true));
                assert!(payload["run_id"].as_str().is_some());
            }
            _ => panic!("expected suspend"),
        }
    }
}
