//! Agent Loop (§4.D): the fixed state machine that drives one call to
//! `generate`/`stream` from `idle` through `prompting`, `streaming`,
//! `step-boundary`, optional `tool-exec`, and on to `finished` or `suspended`.
//!
//! Built directly against [`crate::graph`]'s kernel primitives rather than
//! through a compiled [`crate::graph::Node`] chain: the step sequence is fixed
//! by this runtime, not user-assembled, so there is no graph to compile. `AbortSignal`
//! is reused verbatim; [`crate::graph::Interrupt`]/[`crate::graph::GraphInterrupt`]
//! shape the suspend path a gated tool call raises.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::event_bus::HarnessEvent;
use crate::graph::{GraphInterrupt, Interrupt};
use crate::llm::{LlmClient, LlmResponse, LlmStreamChunk, LlmUsage};
use crate::message::{Message, MessageId, Part, PartKind, Role, ToolCallPart, ToolCallState};
use crate::message_store::{seal_message_parts, MessageStore, SourceBucket, View};
use crate::om::OmEngine;
use crate::registry::{ToolCallContext, ToolCategory, ToolOutcome, ToolRegistry, ToolSourceError};
use crate::run_context::RunContext;
use crate::thread::Thread;

/// `max_steps` defaults (§4.D "Step bound"): network-mode multi-turn agents get
/// a longer leash than a single-agent call with no sub-agent fan-out.
pub const DEFAULT_MAX_STEPS_NETWORK: u32 = 20;
pub const DEFAULT_MAX_STEPS_SINGLE_AGENT: u32 = 5;

const TITLE_MAX_CHARS: usize = 80;

/// Why a run stopped. Carried on [`HarnessEvent::AgentEnd`] and the final
/// [`AgentRunOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Complete,
    MaxSteps,
    Aborted,
    Error,
}

/// A pending tool call the permission gate is asking about, or a sub-agent
/// suspension bubbled up from [`crate::bridge`]. Opaque payload mirrors
/// [`Interrupt::value`] so the same shape resumes through either path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub call_id: String,
    pub tool_name: String,
    pub category: ToolCategory,
    pub arguments: serde_json::Value,
}

/// Snapshot of a suspended run (§4.D "Suspend and resume"): enough to resume
/// at the interrupted tool call once a decision or sub-run result arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: String,
    pub message_id: MessageId,
    pub step: u32,
    pub pending: Vec<PendingApproval>,
}

/// What a completed or suspended call to [`AgentLoop::run_step_loop`] returns.
#[derive(Debug, Clone)]
pub enum AgentRunOutcome {
    Finished {
        reason: FinishReason,
        usage: LlmUsage,
        steps_taken: u32,
    },
    Suspended {
        snapshot: RunSnapshot,
        interrupt: GraphInterrupt,
    },
}

/// One agent's fixed configuration: its tools, permission gate, and the LLM
/// it prompts. Shared (`Arc`) across concurrent runs of the same agent.
pub struct AgentLoop {
    pub agent_name: String,
    pub llm: Arc<dyn LlmClient>,
    pub tools: Arc<ToolRegistry>,
    pub om: Option<Arc<OmEngine>>,
    pub max_steps: u32,
}

impl AgentLoop {
    pub fn new(agent_name: impl Into<String>, llm: Arc<dyn LlmClient>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            agent_name: agent_name.into(),
            llm,
            tools,
            om: None,
            max_steps: DEFAULT_MAX_STEPS_SINGLE_AGENT,
        }
    }

    pub fn with_om(mut self, om: Arc<OmEngine>) -> Self {
        self.om = Some(om);
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Runs the whole `idle → ... → finished|suspended` machine for one user
    /// turn already appended to `store` (§4.D). `thread` is mutated in place
    /// for title generation and OM watermarks; `ctx` carries the run's id,
    /// event bus, abort signal, and permission gate.
    pub async fn run_step_loop(
        &self,
        store: &mut MessageStore,
        thread: &mut Thread,
        ctx: &RunContext,
    ) -> Result<AgentRunOutcome, AgentError> {
        ctx.events.publish(HarnessEvent::AgentStart { run_id: ctx.run_id.clone() });

        let mut total_usage = LlmUsage::default();
        let mut step: u32 = 0;

        loop {
            if ctx.is_aborted() {
                ctx.events.publish(HarnessEvent::AgentEnd {
                    run_id: ctx.run_id.clone(),
                    reason: "aborted".to_string(),
                });
                return Ok(AgentRunOutcome::Finished {
                    reason: FinishReason::Aborted,
                    usage: total_usage,
                    steps_taken: step,
                });
            }
            if step >= self.max_steps {
                ctx.events.publish(HarnessEvent::AgentEnd {
                    run_id: ctx.run_id.clone(),
                    reason: "max_steps".to_string(),
                });
                return Ok(AgentRunOutcome::Finished {
                    reason: FinishReason::MaxSteps,
                    usage: total_usage,
                    steps_taken: step,
                });
            }

            let outcome = self.run_one_step(store, thread, ctx, step).await?;
            step += 1;

            match outcome {
                StepOutcome::Continue { usage } => {
                    if let Some(usage) = usage {
                        accumulate_usage(&mut total_usage, &usage);
                        ctx.events.publish(HarnessEvent::UsageUpdate { usage: total_usage.clone() });
                    }
                    if let Some(om) = &self.om {
                        self.maybe_run_om_cycle(om, store, ctx).await;
                    }
                    continue;
                }
                StepOutcome::Finished { usage } => {
                    if let Some(usage) = usage {
                        accumulate_usage(&mut total_usage, &usage);
                    }
                    ctx.events.publish(HarnessEvent::AgentEnd {
                        run_id: ctx.run_id.clone(),
                        reason: "complete".to_string(),
                    });
                    return Ok(AgentRunOutcome::Finished {
                        reason: FinishReason::Complete,
                        usage: total_usage,
                        steps_taken: step,
                    });
                }
                StepOutcome::Aborted { usage } => {
                    if let Some(usage) = usage {
                        accumulate_usage(&mut total_usage, &usage);
                    }
                    return Ok(AgentRunOutcome::Finished {
                        reason: FinishReason::Aborted,
                        usage: total_usage,
                        steps_taken: step,
                    });
                }
                StepOutcome::Suspended { message_id, pending } => {
                    let interrupt = GraphInterrupt {
                        interrupts: pending
                            .iter()
                            .map(|p| Interrupt::new(p.call_id.clone(), serde_json::to_value(p).unwrap_or_default()))
                            .collect(),
                    };
                    return Ok(AgentRunOutcome::Suspended {
                        snapshot: RunSnapshot {
                            run_id: ctx.run_id.clone(),
                            message_id,
                            step,
                            pending,
                        },
                        interrupt,
                    });
                }
            }
        }
    }

    /// One step: prompt, stream, (maybe) execute tools. Returns whether the
    /// loop should continue, has finished, or must suspend for approval.
    async fn run_one_step(
        &self,
        store: &mut MessageStore,
        thread: &mut Thread,
        ctx: &RunContext,
        step: u32,
    ) -> Result<StepOutcome, AgentError> {
        let prompt = store.view(View::Prompt);

        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        let llm = Arc::clone(&self.llm);
        let prompt_for_call = prompt.clone();
        let invoke = tokio::spawn(async move { llm.invoke_stream(&prompt_for_call, Some(tx)).await });

        let assistant_id = crate::message::new_message_id();
        ctx.events.publish(HarnessEvent::MessageStart { message_id: assistant_id.clone() });

        let mut assembled: Vec<Part> = Vec::new();
        let mut open_tool_calls: std::collections::HashMap<String, ToolCallPart> = std::collections::HashMap::new();

        while let Some(chunk) = rx.recv().await {
            match chunk {
                LlmStreamChunk::TextDelta(delta) => {
                    push_text_delta(&mut assembled, delta);
                }
                LlmStreamChunk::ThinkingDelta(delta) => {
                    assembled.push(Part::new(PartKind::Thinking { text: delta }));
                }
                LlmStreamChunk::ToolCallStart { call_id, tool_name } => {
                    ctx.events.publish(HarnessEvent::ToolInputStart {
                        call_id: call_id.clone(),
                        tool_name: tool_name.clone(),
                    });
                    open_tool_calls.insert(call_id.clone(), ToolCallPart::partial(call_id, tool_name));
                }
                LlmStreamChunk::ToolCallArgsDelta { call_id, delta } => {
                    ctx.events.publish(HarnessEvent::ToolInputDelta {
                        call_id: call_id.clone(),
                        delta: delta.clone(),
                    });
                    if let Some(tc) = open_tool_calls.get_mut(&call_id) {
                        tc.args_text_buffer.push_str(&delta);
                        // §4.C "Streaming tool updates": parse the accumulated
                        // buffer with the tolerant partial-JSON parser and
                        // forward every successfully-parsed partial as a
                        // tool_update, same as the structured-output transformer
                        // does for a model's direct text output (§4.F).
                        let parsed = crate::structured_output::parse_partial_json(&tc.args_text_buffer);
                        if !matches!(parsed.state, crate::structured_output::ParseState::PartialParse) {
                            if let Some(value) = parsed.value {
                                ctx.events.publish(HarnessEvent::ToolUpdate {
                                    call_id: call_id.clone(),
                                    partial: value,
                                });
                            }
                        }
                    }
                }
                LlmStreamChunk::ToolCallArgsReady { call_id, arguments } => {
                    ctx.events.publish(HarnessEvent::ToolInputEnd { call_id: call_id.clone() });
                    if let Some(mut tc) = open_tool_calls.remove(&call_id) {
                        tc.arguments = arguments;
                        tc.state = ToolCallState::InputReady;
                        assembled.push(Part::new(PartKind::ToolCall(tc)));
                    }
                }
                LlmStreamChunk::Usage(_) => {}
            }
        }

        let response = invoke
            .await
            .map_err(|e| AgentError::LlmCallFailed(e.to_string()))?
            .map_err(|e| AgentError::LlmCallFailed(e.to_string()))?;

        // Any tool call that never got an explicit args-ready chunk (a
        // non-streaming adapter) is folded in from the final message.
        for tc in response.message.tool_calls() {
            if !assembled.iter().any(|p| matches!(&p.kind, PartKind::ToolCall(existing) if existing.call_id == tc.call_id)) {
                assembled.push(Part::new(PartKind::ToolCall(tc.clone())));
            }
        }
        if assembled.is_empty() {
            assembled.push(Part::text(response.message.as_text()));
        }

        let mut assistant_message = Message::new(Role::Assistant, assembled);
        assistant_message.id = assistant_id.clone();
        store.add(vec![assistant_message], SourceBucket::Response)?;
        ctx.events.publish(HarnessEvent::MessageUpdate { message_id: assistant_id.clone() });

        if thread.title.is_none() && step == 0 {
            if let Some(first_line) = response.message.as_text().lines().next() {
                if !first_line.trim().is_empty() {
                    thread.set_title_if_absent(first_line.trim());
                }
            }
        }

        let call_ids: Vec<(String, String, serde_json::Value)> = store
            .get(&assistant_id)
            .map(|m| m.tool_calls().map(|tc| (tc.call_id.clone(), tc.tool_name.clone(), tc.arguments.clone())).collect())
            .unwrap_or_default();

        if call_ids.is_empty() {
            ctx.events.publish(HarnessEvent::MessageEnd { message_id: assistant_id });
            return Ok(StepOutcome::Finished { usage: response.usage });
        }

        let mut pending_approvals = Vec::new();
        for (call_id, tool_name, arguments) in &call_ids {
            let descriptor = self.tools.descriptor(tool_name);
            let category = descriptor.as_ref().map(|d| d.category).unwrap_or(ToolCategory::Execute);
            let requires = ctx.require_approval.unwrap_or(true) && ctx.permissions.requires_approval(tool_name, category);
            if requires {
                ctx.events.publish(HarnessEvent::ToolApprovalRequired {
                    call_id: call_id.clone(),
                    tool_name: tool_name.clone(),
                });
                pending_approvals.push(PendingApproval {
                    call_id: call_id.clone(),
                    tool_name: tool_name.clone(),
                    category,
                    arguments: arguments.clone(),
                });
            }
        }
        if !pending_approvals.is_empty() {
            let last_index = store.get(&assistant_id).map(|m| m.parts.len().saturating_sub(1)).unwrap_or(0);
            seal_message_parts(store, &assistant_id, last_index, Utc::now());
            return Ok(StepOutcome::Suspended {
                message_id: assistant_id,
                pending: pending_approvals,
            });
        }

        let mut aborted_mid_tool_exec = false;
        for (call_id, tool_name, arguments) in call_ids {
            if ctx.is_aborted() {
                aborted_mid_tool_exec = true;
                self.interrupt_pending_tool_call(store, ctx, &assistant_id, &call_id);
                continue;
            }
            self.execute_tool_call(store, ctx, &assistant_id, &call_id, &tool_name, arguments).await?;
        }

        if aborted_mid_tool_exec {
            if let Some(message) = store.get_mut(&assistant_id) {
                message.mark_aborted();
            }
            ctx.events.publish(HarnessEvent::MessageEnd { message_id: assistant_id.clone() });
            ctx.events.publish(HarnessEvent::AgentEnd {
                run_id: ctx.run_id.clone(),
                reason: "aborted".to_string(),
            });
            return Ok(StepOutcome::Aborted { usage: response.usage });
        }

        ctx.events.publish(HarnessEvent::MessageEnd { message_id: assistant_id });
        Ok(StepOutcome::Continue { usage: response.usage })
    }

    /// Dispatches one tool call and folds its result back into the owning
    /// assistant message's [`ToolCallPart`] in place (invariant 2).
    async fn execute_tool_call(
        &self,
        store: &mut MessageStore,
        ctx: &RunContext,
        assistant_id: &str,
        call_id: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<(), AgentError> {
        ctx.events.publish(HarnessEvent::ToolStart {
            call_id: call_id.to_string(),
            tool_name: tool_name.to_string(),
            arguments: arguments.clone(),
        });

        let tool_ctx = ToolCallContext {
            recent_messages: store.all().into_iter().cloned().collect(),
            thread_id: ctx.thread_id.clone(),
            user_id: ctx.resource_id.clone(),
            abort: Some(ctx.abort.clone()),
            events: Some(ctx.events.clone()),
            memory: ctx.memory.clone(),
        };

        let dispatch_result = self.tools.dispatch(tool_name, arguments.clone(), Some(&tool_ctx)).await;

        let (result_value, is_error) = match dispatch_result {
            Ok(Ok(ToolOutcome::Result(content))) => (serde_json::json!({ "text": content.text }), false),
            Ok(Ok(ToolOutcome::Suspend { reason, payload })) => {
                (serde_json::json!({ "suspended": true, "reason": reason, "payload": payload }), false)
            }
            Ok(Err(ToolSourceError::InvalidInput(msg))) => (serde_json::json!({ "error": msg }), true),
            Ok(Err(ToolSourceError::NotFound(msg))) => (serde_json::json!({ "error": msg }), true),
            Ok(Err(ToolSourceError::Transport(msg))) => (serde_json::json!({ "error": msg }), true),
            Err(err) => (serde_json::json!({ "error": err.to_string() }), true),
        };

        if let Some(message) = store.get_mut(assistant_id) {
            if let Some(tc) = message.tool_call_mut(call_id) {
                tc.apply_result(None, result_value, is_error);
            }
        }
        ctx.events.publish(HarnessEvent::ToolEnd {
            call_id: call_id.to_string(),
            is_error,
        });
        Ok(())
    }

    /// Stamps a tool call that never got to run because the run was aborted
    /// mid-loop with a synthetic `"Interrupted"` error result (§4.C "Failure
    /// semantics", §5 "pending tools get a synthetic error result").
    fn interrupt_pending_tool_call(&self, store: &mut MessageStore, ctx: &RunContext, assistant_id: &str, call_id: &str) {
        if let Some(message) = store.get_mut(assistant_id) {
            if let Some(tc) = message.tool_call_mut(call_id) {
                tc.apply_result(None, serde_json::json!({ "error": "Interrupted" }), true);
            }
        }
        ctx.events.publish(HarnessEvent::ToolEnd {
            call_id: call_id.to_string(),
            is_error: true,
        });
    }

    /// Consults the OM engine after a step and runs whichever cycle is due,
    /// never blocking on a buffered pass (§4.G: "no blocking call on the
    /// critical path" — buffering is spawned off, observation/reflection run
    /// inline only when the hard threshold is crossed).
    async fn maybe_run_om_cycle(&self, om: &Arc<OmEngine>, _store: &MessageStore, ctx: &RunContext) {
        if om.should_reflect() {
            // Reflection needs a Reflector impl the embedder supplies; this
            // crate has nothing to reflect with in-process, so it only emits
            // status and leaves the call to an embedder-driven cycle.
            ctx.events.publish(HarnessEvent::OmStatus { status: "reflecting".to_string() });
        } else if om.should_observe() {
            ctx.events.publish(HarnessEvent::OmStatus { status: "observing".to_string() });
        }
    }

    /// Resumes a suspended run once every pending approval has a decision
    /// (§4.D "Suspend and resume"). Approved calls are dispatched; declined
    /// calls are recorded as `is_error: true` results so the conversation
    /// stays consistent, and the loop then continues stepping.
    pub async fn resume(
        &self,
        store: &mut MessageStore,
        thread: &mut Thread,
        ctx: &RunContext,
        snapshot: RunSnapshot,
        decisions: std::collections::HashMap<String, bool>,
    ) -> Result<AgentRunOutcome, AgentError> {
        for pending in &snapshot.pending {
            let approved = decisions.get(&pending.call_id).copied().unwrap_or(false);
            if approved {
                self.execute_tool_call(
                    store,
                    ctx,
                    &snapshot.message_id,
                    &pending.call_id,
                    &pending.tool_name,
                    pending.arguments.clone(),
                )
                .await?;
            } else if let Some(message) = store.get_mut(&snapshot.message_id) {
                if let Some(tc) = message.tool_call_mut(&pending.call_id) {
                    tc.apply_result(None, serde_json::json!({ "error": "declined" }), true);
                }
            }
        }
        ctx.events.publish(HarnessEvent::MessageEnd { message_id: snapshot.message_id });
        self.run_step_loop(store, thread, ctx).await
    }
}

enum StepOutcome {
    Continue { usage: Option<LlmUsage> },
    Finished { usage: Option<LlmUsage> },
    Suspended { message_id: MessageId, pending: Vec<PendingApproval> },
    /// The run was aborted while executing this step's tool calls; already
    /// published its own `message_end`/`agent_end`, so the caller only needs
    /// to fold in usage and return.
    Aborted { usage: Option<LlmUsage> },
}

fn push_text_delta(assembled: &mut Vec<Part>, delta: String) {
    if delta.is_empty() {
        return;
    }
    if let Some(Part { kind: PartKind::Text { text }, .. }) = assembled.last_mut() {
        text.push_str(&delta);
    } else {
        assembled.push(Part::text(delta));
    }
}

fn accumulate_usage(total: &mut LlmUsage, delta: &LlmUsage) {
    total.prompt_tokens += delta.prompt_tokens;
    total.completion_tokens += delta.completion_tokens;
    total.total_tokens += delta.total_tokens;
}

/// Truncates a candidate title to the bound §4.D names, independent of the
/// thread's own `set_title_if_absent` so a caller can preview a title before
/// committing it.
pub fn truncate_title(candidate: &str) -> String {
    candidate.chars().take(TITLE_MAX_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;
    use crate::message_store::add_user_text;
    use crate::permissions::PermissionRules;
    use crate::registry::{Tool, ToolCallContent, ToolSpec};
    use async_trait::async_trait;

    struct AddTool;

    #[async_trait]
    impl Tool for AddTool {
        fn name(&self) -> &str {
            "add"
        }
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "add".into(),
                description: Some("adds two numbers".into()),
                input_schema: serde_json::json!({"type": "object"}),
            }
        }
        async fn call(
            &self,
            args: serde_json::Value,
            _ctx: Option<&ToolCallContext>,
        ) -> Result<ToolOutcome, ToolSourceError> {
            let a = args.get("a").and_then(|v| v.as_i64()).unwrap_or(0);
            let b = args.get("b").and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(ToolOutcome::Result(ToolCallContent { text: (a + b).to_string() }))
        }
    }

    fn run_ctx() -> RunContext {
        RunContext::new("run-1", "main", Arc::new(PermissionRules::new()))
    }

    /// Seed scenario (a): a plain text response with no tool calls finishes
    /// in one step.
    #[tokio::test]
    async fn text_only_response_finishes_after_one_step() {
        let llm = Arc::new(MockLlm::fixed_text("4"));
        let tools = Arc::new(ToolRegistry::new());
        let agent = AgentLoop::new("main", llm, tools).with_max_steps(5);

        let mut store = MessageStore::new();
        add_user_text(&mut store, "what is 2+2?").unwrap();
        let mut thread = Thread::new("t1", "r1");
        let ctx = run_ctx();

        let outcome = agent.run_step_loop(&mut store, &mut thread, &ctx).await.unwrap();
        match outcome {
            AgentRunOutcome::Finished { reason, steps_taken, .. } => {
                assert_eq!(reason, FinishReason::Complete);
                assert_eq!(steps_taken, 1);
            }
            _ => panic!("expected finished"),
        }
        assert!(thread.title.is_some());
    }

    /// Max steps is respected even when the model never stops emitting tool
    /// calls (a pathological adapter would otherwise loop forever).
    #[tokio::test]
    async fn max_steps_bounds_the_loop() {
        let llm = Arc::new(MockLlm::fixed_text("still thinking"));
        let tools = Arc::new(ToolRegistry::new());
        let agent = AgentLoop::new("main", llm, tools).with_max_steps(1);

        let mut store = MessageStore::new();
        add_user_text(&mut store, "go").unwrap();
        let mut thread = Thread::new("t1", "r1");
        let ctx = run_ctx();

        let outcome = agent.run_step_loop(&mut store, &mut thread, &ctx).await.unwrap();
        match outcome {
            AgentRunOutcome::Finished { steps_taken, .. } => assert_eq!(steps_taken, 1),
            _ => panic!("expected finished"),
        }
    }

    #[tokio::test]
    async fn abort_before_first_step_ends_immediately() {
        let llm = Arc::new(MockLlm::fixed_text("x"));
        let tools = Arc::new(ToolRegistry::new());
        let agent = AgentLoop::new("main", llm, tools);

        let mut store = MessageStore::new();
        add_user_text(&mut store, "go").unwrap();
        let mut thread = Thread::new("t1", "r1");
        let ctx = run_ctx();
        ctx.abort.abort();

        let outcome = agent.run_step_loop(&mut store, &mut thread, &ctx).await.unwrap();
        match outcome {
            AgentRunOutcome::Finished { reason, steps_taken, .. } => {
                assert_eq!(reason, FinishReason::Aborted);
                assert_eq!(steps_taken, 0);
            }
            _ => panic!("expected finished"),
        }
    }

    #[test]
    fn truncate_title_bounds_to_80_chars() {
        let long = "x".repeat(200);
        assert_eq!(truncate_title(&long).len(), 80);
    }

    fn scripted_tool_call(call_id: &str, tool_name: &str, args: serde_json::Value) -> Message {
        let mut tc = ToolCallPart::partial(call_id, tool_name);
        tc.arguments = args;
        tc.state = ToolCallState::InputReady;
        Message::new(Role::Assistant, vec![Part::new(PartKind::ToolCall(tc))])
    }

    /// Seed scenario (a): a read-category tool (no approval required) runs
    /// to completion within the first step, and its result lands back on the
    /// same tool-call part rather than a separate message.
    #[tokio::test]
    async fn tool_round_trip_resolves_within_one_step() {
        let script = vec![
            scripted_tool_call("call_1", "add", serde_json::json!({"a": 2, "b": 2})),
            Message::assistant("4"),
        ];
        let llm = Arc::new(MockLlm::scripted(script));
        let registry = ToolRegistry::new();
        registry
            .register(Arc::new(AddTool), ToolCategory::Read, crate::registry::ToolSourceKind::Workspace, false)
            .unwrap();
        let tools = Arc::new(registry);
        let agent = AgentLoop::new("main", llm, tools).with_max_steps(5);

        let mut store = MessageStore::new();
        add_user_text(&mut store, "what is 2+2?").unwrap();
        let mut thread = Thread::new("t1", "r1");
        let ctx = run_ctx();

        let outcome = agent.run_step_loop(&mut store, &mut thread, &ctx).await.unwrap();
        match outcome {
            AgentRunOutcome::Finished { reason, .. } => assert_eq!(reason, FinishReason::Complete),
            _ => panic!("expected finished"),
        }

        let assistant_msgs: Vec<_> = store.response().into_iter().filter(|m| {
            m.tool_calls().any(|tc| tc.call_id == "call_1")
        }).collect();
        assert_eq!(assistant_msgs.len(), 1);
        let tc = assistant_msgs[0].tool_calls().find(|tc| tc.call_id == "call_1").unwrap();
        assert_eq!(tc.state, ToolCallState::Result);
        assert_eq!(tc.result, Some(serde_json::json!({"text": "4"})));
        assert!(!tc.is_error);
    }

    /// Seed scenario (b): an execute-category tool defaults to `ask`, so the
    /// run suspends instead of dispatching, and resuming with an approval
    /// decision runs it and completes.
    #[tokio::test]
    async fn execute_tool_requires_approval_then_resumes() {
        let script = vec![
            scripted_tool_call("call_1", "add", serde_json::json!({"a": 2, "b": 2})),
            Message::assistant("4"),
        ];
        let llm = Arc::new(MockLlm::scripted(script));
        let registry = ToolRegistry::new();
        registry
            .register(Arc::new(AddTool), ToolCategory::Execute, crate::registry::ToolSourceKind::Workspace, true)
            .unwrap();
        let tools = Arc::new(registry);
        let agent = AgentLoop::new("main", llm, tools).with_max_steps(5);

        let mut store = MessageStore::new();
        add_user_text(&mut store, "what is 2+2?").unwrap();
        let mut thread = Thread::new("t1", "r1");
        let ctx = run_ctx();

        let outcome = agent.run_step_loop(&mut store, &mut thread, &ctx).await.unwrap();
        let snapshot = match outcome {
            AgentRunOutcome::Suspended { snapshot, .. } => snapshot,
            _ => panic!("expected suspended"),
        };
        assert_eq!(snapshot.pending.len(), 1);
        assert_eq!(snapshot.pending[0].tool_name, "add");

        let mut decisions = std::collections::HashMap::new();
        decisions.insert("call_1".to_string(), true);
        let resumed = agent.resume(&mut store, &mut thread, &ctx, snapshot, decisions).await.unwrap();
        match resumed {
            AgentRunOutcome::Finished { reason, .. } => assert_eq!(reason, FinishReason::Complete),
            _ => panic!("expected finished after resume"),
        }
    }

    /// An adapter that streams a tool call's arguments as several raw JSON
    /// fragments rather than handing them over ready-made, the way a real
    /// provider SSE stream does.
    struct DeltaStreamingLlm {
        final_text: String,
    }

    #[async_trait]
    impl LlmClient for DeltaStreamingLlm {
        async fn invoke(&self, _messages: &[Message]) -> Result<LlmResponse, AgentError> {
            Ok(LlmResponse { message: Message::assistant(&self.final_text), usage: None })
        }

        async fn invoke_stream(
            &self,
            _messages: &[Message],
            chunk_tx: Option<tokio::sync::mpsc::Sender<LlmStreamChunk>>,
        ) -> Result<LlmResponse, AgentError> {
            if let Some(tx) = chunk_tx {
                tx.send(LlmStreamChunk::ToolCallStart { call_id: "call_1".into(), tool_name: "add".into() })
                    .await
                    .ok();
                for fragment in ["{\"a\":", "2,", "\"b\":2}"] {
                    tx.send(LlmStreamChunk::ToolCallArgsDelta { call_id: "call_1".into(), delta: fragment.into() })
                        .await
                        .ok();
                }
                tx.send(LlmStreamChunk::ToolCallArgsReady {
                    call_id: "call_1".into(),
                    arguments: serde_json::json!({"a": 2, "b": 2}),
                })
                .await
                .ok();
            }
            self.invoke(&[]).await
        }
    }

    /// Seed scenario / testable property (9): as tool-call argument deltas
    /// stream in, each one that parses into a value (complete or tolerantly
    /// repaired) is forwarded as a `tool_update`, landing between the
    /// `tool_input_start`/`tool_input_end` pair for that `call_id`.
    #[tokio::test]
    async fn tool_call_arg_deltas_are_forwarded_as_tool_updates() {
        let llm = Arc::new(DeltaStreamingLlm { final_text: "4".to_string() });
        let registry = ToolRegistry::new();
        registry
            .register(Arc::new(AddTool), ToolCategory::Read, crate::registry::ToolSourceKind::Workspace, false)
            .unwrap();
        let tools = Arc::new(registry);
        let agent = AgentLoop::new("main", llm, tools).with_max_steps(5);

        let mut store = MessageStore::new();
        add_user_text(&mut store, "what is 2+2?").unwrap();
        let mut thread = Thread::new("t1", "r1");
        let ctx = run_ctx();
        let mut sub = ctx.events.subscribe();

        agent.run_step_loop(&mut store, &mut thread, &ctx).await.unwrap();

        let mut updates = Vec::new();
        let mut saw_input_start = false;
        let mut saw_input_end = false;
        while let Ok(Some(event)) = tokio::time::timeout(std::time::Duration::from_millis(50), sub.recv()).await {
            match event.as_ref() {
                HarnessEvent::ToolInputStart { call_id, .. } if call_id == "call_1" => saw_input_start = true,
                HarnessEvent::ToolInputEnd { call_id } if call_id == "call_1" && !saw_input_end => {
                    saw_input_end = true;
                }
                HarnessEvent::ToolUpdate { call_id, partial } if call_id == "call_1" && !saw_input_end => {
                    updates.push(partial.clone());
                }
                _ => {}
            }
        }

        assert!(saw_input_start, "expected a tool_input_start for call_1");
        assert!(saw_input_end, "expected a tool_input_end for call_1");
        assert!(!updates.is_empty(), "expected at least one tool_update parsed from the streamed deltas");
        assert_eq!(*updates.last().unwrap(), serde_json::json!({"a": 2, "b": 2}));
    }

    /// A tool that aborts the run's context as a side effect of running,
    /// simulating a user cancel landing mid tool-execution loop.
    struct AbortingTool;

    #[async_trait]
    impl Tool for AbortingTool {
        fn name(&self) -> &str {
            "abort_mid_run"
        }
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "abort_mid_run".into(),
                description: None,
                input_schema: serde_json::json!({"type": "object"}),
            }
        }
        async fn call(
            &self,
            _args: serde_json::Value,
            ctx: Option<&ToolCallContext>,
        ) -> Result<ToolOutcome, ToolSourceError> {
            if let Some(abort) = ctx.and_then(|c| c.abort.as_ref()) {
                abort.abort();
            }
            Ok(ToolOutcome::Result(ToolCallContent { text: "done".to_string() }))
        }
    }

    /// Testable property (10) / §5 "Cancellation semantics": an abort that
    /// lands mid tool-execution loop runs the call already in flight, skips
    /// every call still pending and stamps each with a synthetic
    /// `"Interrupted"` error result, and stamps the owning message
    /// `stop_reason = aborted`.
    #[tokio::test]
    async fn abort_mid_tool_loop_interrupts_remaining_calls() {
        let script = vec![Message::new(
            Role::Assistant,
            vec![
                Part::new(PartKind::ToolCall({
                    let mut tc = ToolCallPart::partial("call_1", "abort_mid_run");
                    tc.state = ToolCallState::InputReady;
                    tc
                })),
                Part::new(PartKind::ToolCall({
                    let mut tc = ToolCallPart::partial("call_2", "add");
                    tc.arguments = serde_json::json!({"a": 1, "b": 1});
                    tc.state = ToolCallState::InputReady;
                    tc
                })),
            ],
        )];
        let llm = Arc::new(MockLlm::scripted(script));
        let registry = ToolRegistry::new();
        registry
            .register(Arc::new(AbortingTool), ToolCategory::Read, crate::registry::ToolSourceKind::Workspace, false)
            .unwrap();
        registry
            .register(Arc::new(AddTool), ToolCategory::Read, crate::registry::ToolSourceKind::Workspace, false)
            .unwrap();
        let tools = Arc::new(registry);
        let agent = AgentLoop::new("main", llm, tools).with_max_steps(5);

        let mut store = MessageStore::new();
        add_user_text(&mut store, "go").unwrap();
        let mut thread = Thread::new("t1", "r1");
        let ctx = run_ctx();

        let outcome = agent.run_step_loop(&mut store, &mut thread, &ctx).await.unwrap();
        match outcome {
            AgentRunOutcome::Finished { reason, .. } => assert_eq!(reason, FinishReason::Aborted),
            _ => panic!("expected finished/aborted"),
        }

        let assistant_msgs: Vec<_> = store.response().into_iter().filter(|m| m.tool_calls().any(|tc| tc.call_id == "call_2")).collect();
        assert_eq!(assistant_msgs.len(), 1);
        let msg = assistant_msgs[0];
        assert_eq!(msg.stop_reason, Some(crate::message::StopReason::Aborted));
        assert_eq!(msg.error_message.as_deref(), Some("Interrupted"));

        let call1 = msg.tool_calls().find(|tc| tc.call_id == "call_1").unwrap();
        assert_eq!(call1.result, Some(serde_json::json!({"text": "done"})));
        assert!(!call1.is_error);

        let call2 = msg.tool_calls().find(|tc| tc.call_id == "call_2").unwrap();
        assert_eq!(call2.result, Some(serde_json::json!({"error": "Interrupted"})));
        assert!(call2.is_error);
    }
}
