//! Crate-wide error type.
//!
//! [`AgentError`] is the error surfaced across node execution, tool dispatch, and
//! the agent loop. It follows the same shape as [`crate::memory::CheckpointError`]
//! and [`crate::registry::ToolSourceError`]: a flat `thiserror` enum with one
//! variant per failure class rather than a boxed `dyn Error`, so callers can match
//! on `domain` without downcasting.

use thiserror::Error;

/// Stable domain tag for an [`AgentError`], used by callers that want to branch on
/// error class without matching every variant (e.g. a UI layer picking a hint string).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDomain {
    User,
    System,
    Tool,
    Cancellation,
    Tripwire,
    ThreadLock,
    Transport,
}

/// Errors produced by graph execution, tool dispatch, and the agent loop.
///
/// Tool-level failures do not normally surface here — the dispatch layer converts
/// executor panics/errors into `tool-result{is_error: true}` parts instead (see
/// [`crate::registry`]) so that one failing tool never aborts the run. This
/// type exists for everything that *does* need to propagate: invalid input,
/// storage failures, protocol violations, and the few tool-adjacent failures
/// (collisions, unknown names) that are programmer errors rather than runtime
/// tool failures.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid message content: {0}")]
    InvalidMessageContent(String),

    #[error("invalid tool arguments for {tool_name}: {message}")]
    InvalidToolArguments { tool_name: String, message: String },

    #[error("missing api key for model {0}")]
    MissingApiKey(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("request context validation failed: {0}")]
    RequestContextInvalid(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("adapter protocol violation: {0}")]
    AdapterProtocol(String),

    #[error("processor failed: {0}")]
    ProcessorFailed(String),

    #[error("tool name collision: {0}")]
    ToolNameCollision(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("run was aborted")]
    Aborted,

    #[error("tripwire: {reason}")]
    Tripwire {
        reason: String,
        retry: bool,
        processor_id: String,
    },

    #[error("thread {thread_id} is locked by pid {owner_pid}")]
    ThreadLock { thread_id: String, owner_pid: u32 },

    #[error("transport error (retryable={retryable}): {message}")]
    Transport { message: String, retryable: bool },

    #[error("llm call failed: {0}")]
    LlmCallFailed(String),

    #[error("graph execution error: {0}")]
    Graph(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Checkpoint(#[from] crate::memory::CheckpointError),

    #[error(transparent)]
    ToolSource(#[from] crate::registry::ToolSourceError),
}

impl AgentError {
    /// Coarse error class, used to pick a stable user-visible hint (the hint
    /// strings themselves belong to an embedding UI, not to this crate).
    pub fn domain(&self) -> ErrorDomain {
        match self {
            AgentError::InvalidMessageContent(_)
            | AgentError::InvalidToolArguments { .. }
            | AgentError::MissingApiKey(_)
            | AgentError::UnknownCommand(_)
            | AgentError::RequestContextInvalid(_) => ErrorDomain::User,

            AgentError::Storage(_)
            | AgentError::AdapterProtocol(_)
            | AgentError::ProcessorFailed(_)
            | AgentError::ToolNameCollision(_)
            | AgentError::UnknownTool(_)
            | AgentError::Graph(_)
            | AgentError::Serialization(_)
            | AgentError::Checkpoint(_)
            | AgentError::ToolSource(_)
            | AgentError::LlmCallFailed(_) => ErrorDomain::System,

            AgentError::Aborted => ErrorDomain::Cancellation,
            AgentError::Tripwire { .. } => ErrorDomain::Tripwire,
            AgentError::ThreadLock { .. } => ErrorDomain::ThreadLock,
            AgentError::Transport { .. } => ErrorDomain::Transport,
        }
    }

    /// Whether the caller may reasonably retry this error (adapter-level retries
    /// already exhausted for [`AgentError::Transport`]; this reflects what's left
    /// for the agent loop to decide, e.g. re-running a step after a tripwire).
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::Transport { retryable, .. } => *retryable,
            AgentError::Tripwire { retry, .. } => *retry,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_classification_matches_taxonomy() {
        assert_eq!(
            AgentError::InvalidMessageContent("x".into()).domain(),
            ErrorDomain::User
        );
        assert_eq!(AgentError::Storage("x".into()).domain(), ErrorDomain::System);
        assert_eq!(AgentError::Aborted.domain(), ErrorDomain::Cancellation);
        assert_eq!(
            AgentError::ThreadLock {
                thread_id: "t".into(),
                owner_pid: 1
            }
            .domain(),
            ErrorDomain::ThreadLock
        );
    }

    #[test]
    fn tripwire_retry_flag_is_respected() {
        let e = AgentError::Tripwire {
            reason: "bad output".into(),
            retry: true,
            processor_id: "p1".into(),
        };
        assert!(e.is_retryable());
    }

    #[test]
    fn transport_retryable_flag_is_respected() {
        let retryable = AgentError::Transport {
            message: "rate limited".into(),
            retryable: true,
        };
        let not = AgentError::Transport {
            message: "bad request".into(),
            retryable: false,
        };
        assert!(retryable.is_retryable());
        assert!(!not.is_retryable());
    }
}
