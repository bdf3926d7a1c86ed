//! Event Bus (§4.I): typed fan-out of [`HarnessEvent`]s to subscribers (UI,
//! tracing), delivered in emission order within a single run. Cross-run
//! ordering is not guaranteed; a panicking subscriber is isolated and logged
//! rather than taking down its siblings.
//!
//! Mode-gated `emit_*` publishing collapsed here into one typed enum fanned
//! out over `tokio::sync::broadcast` instead of a bespoke envelope/session/
//! node id scheme — this crate has exactly one kind of envelope (a run), so
//! the broadcast channel's own ordering guarantee is sufficient.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::llm::LlmUsage;
use crate::message::MessageId;

/// Every event the agent loop, stream merger, tool dispatch, OM engine, and
/// permission gate can emit during a run. Tagged on the wire by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HarnessEvent {
    AgentStart { run_id: String },
    AgentEnd { run_id: String, reason: String },

    MessageStart { message_id: MessageId },
    MessageUpdate { message_id: MessageId },
    MessageEnd { message_id: MessageId },

    ToolInputStart { call_id: String, tool_name: String },
    ToolInputDelta { call_id: String, delta: String },
    ToolInputEnd { call_id: String },
    ToolStart { call_id: String, tool_name: String, arguments: serde_json::Value },
    /// Parsed partial result surfaced while a tool is still running (e.g. a
    /// streaming sub-agent or workflow tool reporting incremental progress).
    ToolUpdate { call_id: String, partial: serde_json::Value },
    ToolEnd { call_id: String, is_error: bool },

    ShellOutput { call_id: String, chunk: String },

    Info { message: String },
    Error { message: String },

    ModeChanged { mode: String },
    ModelChanged { model: String },
    ThreadChanged { thread_id: String },
    ThreadCreated { thread_id: String },
    UsageUpdate { usage: LlmUsage },

    OmObservationStart { cycle_id: String },
    OmObservationEnd { cycle_id: String },
    OmObservationFailed { cycle_id: String, reason: String },
    OmReflectionStart { cycle_id: String },
    OmReflectionEnd { cycle_id: String },
    OmReflectionFailed { cycle_id: String, reason: String },
    /// Async token-buffer accumulation crossed a `bufferTokens` watermark
    /// without yet reaching `bufferActivation`.
    OmBufferingStart { cycle_id: String },
    OmBufferingEnd { cycle_id: String },
    OmBufferingFailed { cycle_id: String, reason: String },
    /// Buffer crossed `bufferActivation`; the splice described in §4.G ran.
    OmActivation { cycle_id: String, observation_tokens: u64, generation_count: u64 },
    /// Coarse-grained status snapshot for UI polling (idle/buffering/blocked/etc).
    OmStatus { status: String },

    FollowUpQueued { message_id: MessageId },

    WorkspaceChanged { path: String },
    WorkspaceFileWritten { path: String },

    SubagentStart { call_id: String, agent_name: String },
    SubagentEnd { call_id: String },

    TaskUpdated { task_id: String, status: String },
    AskQuestion { question: String },

    SandboxAccessRequest { call_id: String, resource: String },
    ToolApprovalRequired { call_id: String, tool_name: String },
    PlanApprovalRequired { plan_id: String },
    PlanApproved { plan_id: String },
}

/// Per-run fan-out publisher. Cloning shares the underlying channel, so
/// cloning an [`EventBus`] and handing clones to concurrent tasks (the agent
/// loop, the OM engine) is the intended way to share one run's bus.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Arc<HarnessEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> EventBusSubscriber {
        EventBusSubscriber { rx: self.tx.subscribe() }
    }

    /// Publishes an event. Silently a no-op if there are no subscribers.
    pub fn publish(&self, event: HarnessEvent) {
        let _ = self.tx.send(Arc::new(event));
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

pub struct EventBusSubscriber {
    rx: broadcast::Receiver<Arc<HarnessEvent>>,
}

impl EventBusSubscriber {
    /// Awaits the next event. `Ok(None)` when the bus and all publishers are
    /// gone; `Ok(Some)` skips over events this subscriber lagged behind on
    /// (broadcast semantics — a slow subscriber drops old events, it never
    /// blocks the publisher).
    pub async fn recv(&mut self) -> Option<Arc<HarnessEvent>> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Drives one subscriber with a callback, isolating panics so that
/// subscribers that throw are isolated: a panicking callback is caught,
/// logged, and the loop continues with the next event rather than
/// propagating or killing sibling subscribers.
pub async fn drive_subscriber<F>(mut subscriber: EventBusSubscriber, mut on_event: F)
where
    F: FnMut(Arc<HarnessEvent>) + Send,
{
    while let Some(event) = subscriber.recv().await {
        let result = AssertUnwindSafe(|| on_event(event.clone())).catch_unwind().await;
        if let Err(panic) = result {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "subscriber panicked".to_string());
            tracing::error!(%message, "event bus subscriber panicked; isolated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_events_in_emission_order() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe();
        bus.publish(HarnessEvent::AgentStart { run_id: "r1".into() });
        bus.publish(HarnessEvent::AgentEnd {
            run_id: "r1".into(),
            reason: "complete".into(),
        });

        let first = sub.recv().await.unwrap();
        assert!(matches!(*first, HarnessEvent::AgentStart { .. }));
        let second = sub.recv().await.unwrap();
        assert!(matches!(*second, HarnessEvent::AgentEnd { .. }));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_noop() {
        let bus = EventBus::new(4);
        bus.publish(HarnessEvent::Info { message: "hi".into() });
    }

    #[tokio::test]
    async fn drive_subscriber_isolates_panicking_callback() {
        let bus = EventBus::new(4);
        let sub = bus.subscribe();
        bus.publish(HarnessEvent::Info { message: "one".into() });
        bus.publish(HarnessEvent::Info { message: "two".into() });
        drop(bus);

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        drive_subscriber(sub, move |event| {
            if let HarnessEvent::Info { message } = event.as_ref() {
                if message == "one" {
                    panic!("boom");
                }
                seen_clone.lock().unwrap().push(message.clone());
            }
        })
        .await;

        assert_eq!(*seen.lock().unwrap(), vec!["two".to_string()]);
    }
}
