//! # Skein
//!
//! The coordination core for a multi-step LLM agent runtime: given an LLM
//! connection, a catalog of callable tools, and a conversation history store,
//! drives the reason/act loop that interleaves streamed text, thinking, tool
//! calls, and tool results inside a single logical assistant message.
//!
//! This crate is the coordination layer, not an application. It does not ship
//! a terminal UI, a concrete LLM wire adapter, or a concrete persistent store
//! — those are embedder concerns, specified here only by the trait contracts
//! the core requires of them ([`llm::LlmClient`], [`memory::Store`],
//! [`memory::Checkpointer`]).
//!
//! ## Main modules
//!
//! - [`message`]: [`Message`], [`Part`], [`PartKind`] — the canonical part-based
//!   message shape (§3).
//! - [`message_store`]: [`MessageStore`] — the append/merge log with source
//!   buckets, views, and serialization (§4.A).
//! - [`stream_merger`]: merge-decision and merge-algorithm free functions the
//!   store calls on every incoming streamed delta (§4.B).
//! - [`registry`]: [`ToolRegistry`], [`Tool`], [`ToolDescriptor`] — tool
//!   cataloging, name normalization, and dispatch (§4.C).
//! - [`agent_loop`]: [`AgentLoop`] — the fixed reason/act state machine (§4.D).
//! - [`bridge`]: [`AgentAsTool`], [`WorkflowAsTool`] — sub-agent/workflow
//!   tool bridging with suspend propagation (§4.E).
//! - [`structured_output`]: [`StructuredOutputTransformer`],
//!   [`parse_partial_json`] — incremental JSON-to-typed-value streaming (§4.F).
//! - [`om`]: [`OmEngine`] — the observations/reflection compaction pipeline (§4.G).
//! - [`permissions`]: [`PermissionRules`], [`ApprovalDecision`] — the approval
//!   gate (§4.H).
//! - [`event_bus`]: [`EventBus`], [`HarnessEvent`] — typed fan-out with
//!   per-run ordering (§4.I).
//! - [`thread`]: [`Thread`], [`ObservationalMemoryRecord`], [`ThreadLock`].
//! - [`run_context`]: [`RunContext`] — the by-value context threaded through
//!   every operation.
//! - [`memory`]: [`Checkpointer`], [`Store`] — the storage contracts this
//!   crate requires, plus in-memory reference implementations.
//! - [`llm`]: [`LlmClient`] trait plus [`MockLlm`] for tests.
//! - [`tools`]: concrete workspace/memory/todo [`registry::Tool`] implementations.
//! - [`graph`]: surviving cancellation/interrupt primitives the agent loop is
//!   built against.
//! - [`config`]: [`RunConfigSummary`] aggregator for verbose/redacted logging.
//! - [`error`]: [`AgentError`], the crate-wide error type.
//!
//! Key types are re-exported at crate root.

pub mod agent_loop;
pub mod bridge;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod graph;
pub mod llm;
pub mod memory;
pub mod message;
pub mod message_store;
pub mod om;
pub mod permissions;
pub mod registry;
pub mod run_context;
pub mod stream_merger;
pub mod structured_output;
pub mod thread;
pub mod tools;
pub mod user_message;

pub use agent_loop::{
    AgentLoop, AgentRunOutcome, FinishReason, PendingApproval, RunSnapshot,
    DEFAULT_MAX_STEPS_NETWORK, DEFAULT_MAX_STEPS_SINGLE_AGENT,
};
pub use bridge::{
    AgentAsTool, AgentToolInput, AgentToolOutput, Workflow, WorkflowAsTool, WorkflowOutcome,
};
pub use config::{
    build_config_summary, ConfigSection, EmbeddingConfigSummary, LlmConfigSummary,
    MemoryConfigSummary, RunConfigSummary, RunConfigSummarySource, ToolConfigSummary,
};
pub use error::{AgentError, ErrorDomain};
pub use event_bus::{drive_subscriber, EventBus, EventBusSubscriber, HarnessEvent};
pub use graph::{AbortSignal, DefaultInterruptHandler, GraphInterrupt, Interrupt, InterruptHandler};
pub use llm::{LlmClient, LlmResponse, LlmStreamChunk, LlmUsage, MockLlm, ToolChoiceMode};
pub use memory::{
    Checkpoint, CheckpointError, CheckpointListItem, CheckpointMetadata, CheckpointSource,
    Checkpointer, InMemoryStore, Item, MemorySaver, Namespace, RunnableConfig, Store, StoreError,
};
pub use message::{
    new_message_id, Message, MessageId, Part, PartKind, PartMetadata, Role, ToolCallPart,
    ToolCallState,
};
pub use message_store::{
    add_user_text, assistant_text_part, seal_message_parts, MessageStore, RecordedOp,
    SerializedStore, SourceBucket, View,
};
pub use om::{CycleState, ObservationConfig, ObservationScope, OmEngine, OmRecord, Observer,
    Reflector, ReflectionConfig, TokenBound};
pub use permissions::{ApprovalDecision, PermissionRules, Policy};
pub use registry::{
    normalize_tool_name, Tool, ToolCallContent, ToolCallContext, ToolCategory, ToolDescriptor,
    ToolOutcome, ToolRegistry, ToolSourceError, ToolSourceKind, ToolSpec,
};
pub use run_context::RunContext;
pub use stream_merger::{fresh_overflow_id, merge_into, should_merge, should_merge_with_mode};
pub use structured_output::{
    parse_partial_json, ErrorStrategy, OutputFormat, ParseState, PartialJsonResult,
    StructuredChunk, StructuredOutputTransformer,
};
pub use thread::{
    om_record_key, ObservationalMemoryRecord, Thread, ThreadLock, ThreadMetadata, ThreadOmState,
};
pub use tools::{
    ApplyPatchTool, EditFileTool, GlobTool, ListMemoriesTool, LsTool, MultieditTool, ReadFileTool,
    RecallTool, RememberTool, SearchMemoriesTool, TodoReadTool, TodoWriteTool, WriteFileTool,
};
pub use user_message::{NoOpUserMessageStore, UserMessageStore, UserMessageStoreError};
