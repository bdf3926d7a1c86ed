//! Human-in-the-loop interrupts: pause a run for an external decision, then resume.
//!
//! Distinct from [`crate::graph::AbortSignal`] (which is a hard stop): an
//! interrupt is a planned suspension a node raises deliberately — the tool
//! approval gate and the sub-agent/workflow suspend path are built on top of it.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AgentError;

/// One suspension point raised by a node.
#[derive(Debug, Clone)]
pub struct Interrupt {
    pub node_id: String,
    /// Opaque payload describing what's being asked (e.g. a pending tool call).
    pub value: Value,
}

impl Interrupt {
    pub fn new(node_id: impl Into<String>, value: Value) -> Self {
        Self {
            node_id: node_id.into(),
            value,
        }
    }
}

/// Carries every interrupt raised during one graph run; returned to the caller
/// instead of a final state when the run suspends.
#[derive(Debug, Clone, Default)]
pub struct GraphInterrupt {
    pub interrupts: Vec<Interrupt>,
}

impl GraphInterrupt {
    pub fn single(interrupt: Interrupt) -> Self {
        Self {
            interrupts: vec![interrupt],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.interrupts.is_empty()
    }
}

/// Resolves an [`Interrupt`] into a resume value, or declines to (propagating the
/// error up so the caller sees the run suspended).
///
/// Implementations typically forward the interrupt to a UI or API caller and
/// block on a decision; [`DefaultInterruptHandler`] always declines, which is
/// correct for graphs that expect the embedder to drive resume explicitly via
/// stored state rather than an in-process callback.
#[async_trait]
pub trait InterruptHandler: Send + Sync {
    async fn on_interrupt(&self, interrupt: &Interrupt) -> Result<Value, AgentError>;
}

/// Handler that never resolves an interrupt in-process; every suspension must be
/// resumed out-of-band (e.g. via `resume_stream`), which is the only correct path
/// for cross-process resumes per the suspend/resume design.
pub struct DefaultInterruptHandler;

#[async_trait]
impl InterruptHandler for DefaultInterruptHandler {
    async fn on_interrupt(&self, interrupt: &Interrupt) -> Result<Value, AgentError> {
        Err(AgentError::Tripwire {
            reason: format!("unresolved interrupt at node {}", interrupt.node_id),
            retry: false,
            processor_id: interrupt.node_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_handler_declines_every_interrupt() {
        let handler = DefaultInterruptHandler;
        let interrupt = Interrupt::new("approve", serde_json::json!({"tool": "bash"}));
        let result = handler.on_interrupt(&interrupt).await;
        assert!(result.is_err());
    }

    #[test]
    fn graph_interrupt_single_wraps_one_interrupt() {
        let gi = GraphInterrupt::single(Interrupt::new("n", Value::Null));
        assert!(!gi.is_empty());
        assert_eq!(gi.interrupts.len(), 1);
    }
}
