//! Message and part types for the conversation state machine.
//!
//! A [`Message`] is the canonical unit the [`crate::message_store`] and
//! [`crate::stream_merger`] operate on: a role, a creation time, and an ordered
//! list of [`Part`]s. Earlier revisions of this crate modeled a message as a bare
//! `enum Message { System(String), User(String), Assistant(String) }` — fine for
//! a single text turn, but unable to represent a streaming assistant turn that
//! interleaves thinking, tool calls, and tool results inside one logical message.
//! This module generalizes that shape without discarding it: [`Message::user`],
//! [`Message::system`], and [`Message::assistant`] still build a one-part text
//! message, so call sites that only ever dealt with plain text are unaffected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable message identifier. A `String` rather than a newtype wrapping `Uuid`
/// because ids may arrive from external callers (memory recall, resumed runs)
/// that don't mint them through [`new_message_id`].
pub type MessageId = String;

/// Generates a fresh message id.
pub fn new_message_id() -> MessageId {
    Uuid::new_v4().to_string()
}

/// Message role, per §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// State of a tool-call part as it streams in and is later resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolCallState {
    /// Arguments are still streaming in as partial JSON text.
    PartialInput,
    /// Arguments parsed successfully; ready to dispatch.
    InputReady,
    /// The tool ran; `result` and `is_error` are populated.
    Result,
}

/// A tool invocation embedded in an assistant message.
///
/// The result of calling the tool does *not* become a separate part — per
/// invariant 2, it updates this part in place (`state` moves to `Result`,
/// `result`/`is_error` populate, `arguments` gains any late-arriving fields).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallPart {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub state: ToolCallState,
    /// Raw accumulated text of the arguments as they streamed in, kept even
    /// after `arguments` parses successfully so a late partial-JSON repair can
    /// re-derive it.
    pub args_text_buffer: String,
    pub result: Option<serde_json::Value>,
    pub is_error: bool,
}

impl ToolCallPart {
    pub fn partial(call_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments: serde_json::Value::Null,
            state: ToolCallState::PartialInput,
            args_text_buffer: String::new(),
            result: None,
            is_error: false,
        }
    }

    /// Applies a tool result: moves to `Result`, unions `arguments` with any
    /// late-arriving fields (existing keys win), merges nothing else — callers
    /// merging `provider_metadata` do so on the enclosing [`Part::metadata`].
    pub fn apply_result(&mut self, arguments: Option<serde_json::Value>, result: serde_json::Value, is_error: bool) {
        if let Some(serde_json::Value::Object(incoming)) = arguments {
            let existing = self
                .arguments
                .as_object_mut()
                .map(std::mem::take)
                .unwrap_or_default();
            let mut merged = incoming;
            for (k, v) in existing {
                merged.insert(k, v);
            }
            self.arguments = serde_json::Value::Object(merged);
        }
        self.state = ToolCallState::Result;
        self.result = Some(result);
        self.is_error = is_error;
    }
}

/// Per-part metadata: sealing marker and opaque provider-specific data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartMetadata {
    /// When set, this part is frozen: merges never alter it or anything before
    /// it in the same message (invariant 3 / 5.E sealing).
    pub sealed_at: Option<DateTime<Utc>>,
    pub provider_metadata: Option<serde_json::Value>,
}

impl PartMetadata {
    pub fn sealed(at: DateTime<Utc>) -> Self {
        Self {
            sealed_at: Some(at),
            provider_metadata: None,
        }
    }

    pub fn merge_provider_metadata(&mut self, other: &Option<serde_json::Value>) {
        let Some(other) = other else { return };
        match (&mut self.provider_metadata, other) {
            (Some(serde_json::Value::Object(existing)), serde_json::Value::Object(incoming)) => {
                for (k, v) in incoming {
                    existing.insert(k.clone(), v.clone());
                }
            }
            (slot @ None, _) => *slot = Some(other.clone()),
            _ => {}
        }
    }
}

/// The payload of a single [`Part`], discriminated by `type` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PartKind {
    Text { text: String },
    Thinking { text: String },
    ToolCall(ToolCallPart),
    /// Inserted before the first text-after-tool so a renderer can show "the
    /// model spoke again after using a tool".
    StepStart,
    OmObservationStart { cycle_id: String },
    OmObservationEnd { cycle_id: String },
    OmObservationFailed { cycle_id: String, reason: String },
    Image { data: String, mime_type: String },
    Source { url: String, title: Option<String> },
    File { path: String, mime_type: Option<String> },
}

/// One entry in a message's ordered part list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    pub kind: PartKind,
    #[serde(default)]
    pub metadata: PartMetadata,
}

impl Part {
    pub fn new(kind: PartKind) -> Self {
        Self {
            kind,
            metadata: PartMetadata::default(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(PartKind::Text { text: text.into() })
    }

    pub fn is_sealed(&self) -> bool {
        self.metadata.sealed_at.is_some()
    }

    /// Content-equality used by the merger's dedup and seal-split logic: two
    /// parts are equal if their `kind` serializes identically, ignoring
    /// metadata (a part re-arriving with fresh provider metadata but the same
    /// content is still "the same part" for dedup purposes).
    pub fn content_eq(&self, other: &Part) -> bool {
        serde_json::to_value(&self.kind).ok() == serde_json::to_value(&other.kind).ok()
    }
}

/// A message in the conversation: role, ordered parts, and placement (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub thread_id: Option<String>,
    pub resource_id: Option<String>,
    pub parts: Vec<Part>,
    /// §4.B merge-decision condition (iv): set once a message represents a
    /// finished task result (`completionResult` / `isTaskCompleteResult` in
    /// the spec's own terms). Distinct from sealing — a message can be sealed
    /// up to some boundary and still be mid-stream, but a completion-marked
    /// message is never a merge target at all.
    #[serde(default)]
    pub is_task_complete_result: bool,
    /// §5 "the streaming assistant message is stamped `stopReason = aborted`":
    /// set on the in-flight assistant message when a run ends other than by
    /// the model simply finishing.
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    /// Paired with `stop_reason = aborted`: `"Interrupted"` per §5.
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Why a message's stream ended, when it ended for a reason other than the
/// model completing normally (§5 "Cancellation semantics").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Aborted,
}

impl Message {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            id: new_message_id(),
            role,
            created_at: Utc::now(),
            thread_id: None,
            resource_id: None,
            parts,
            is_task_complete_result: false,
            stop_reason: None,
            error_message: None,
        }
    }

    /// Stamps this message `stopReason = aborted`, `errorMessage = "Interrupted"`
    /// (§5), for the in-flight assistant message of a run that was cancelled.
    pub fn mark_aborted(&mut self) {
        self.stop_reason = Some(StopReason::Aborted);
        self.error_message = Some("Interrupted".to_string());
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, vec![Part::text(content)])
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(content)])
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![Part::text(content)])
    }

    /// Boundary case (§8): empty text with non-empty images gets an
    /// `[N images]` prefix and no text part.
    pub fn user_with_images(text: impl Into<String>, images: Vec<(String, String)>) -> Self {
        let text = text.into();
        let mut parts = Vec::new();
        if text.is_empty() && !images.is_empty() {
            parts.push(Part::text(format!("[{} images]", images.len())));
        } else if !text.is_empty() {
            parts.push(Part::text(text));
        }
        for (data, mime_type) in images {
            parts.push(Part::new(PartKind::Image { data, mime_type }));
        }
        Self::new(Role::User, parts)
    }

    /// Flattens every `Text` part into a single string, in order. Does not
    /// include `Thinking` text — callers that need private reasoning use
    /// [`Message::thinking_text`] explicitly.
    pub fn as_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match &p.kind {
                PartKind::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn thinking_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match &p.kind {
                PartKind::Thinking { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallPart> {
        self.parts.iter().filter_map(|p| match &p.kind {
            PartKind::ToolCall(tc) => Some(tc),
            _ => None,
        })
    }

    pub fn tool_call_mut(&mut self, call_id: &str) -> Option<&mut ToolCallPart> {
        self.parts.iter_mut().find_map(|p| match &mut p.kind {
            PartKind::ToolCall(tc) if tc.call_id == call_id => Some(tc),
            _ => None,
        })
    }

    /// Index of the last sealed part, if any (invariant 3 / 5.E). Parts at or
    /// before this index are immutable; a merge that needs to touch anything
    /// beyond it must re-home the overflow under a fresh message id.
    pub fn sealed_boundary(&self) -> Option<usize> {
        self.parts.iter().rposition(|p| p.is_sealed())
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed_boundary().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_produce_single_text_part() {
        let sys = Message::system("s");
        assert_eq!(sys.role, Role::System);
        assert_eq!(sys.as_text(), "s");

        let usr = Message::user("u");
        assert_eq!(usr.role, Role::User);
        assert_eq!(usr.as_text(), "u");

        let ast = Message::assistant("a");
        assert_eq!(ast.role, Role::Assistant);
        assert_eq!(ast.as_text(), "a");
    }

    /// Boundary case from §8: empty text + images -> `[N images]` prefix, no text part.
    #[test]
    fn empty_text_with_images_gets_count_prefix() {
        let m = Message::user_with_images(
            "",
            vec![("aGVsbG8=".into(), "image/png".into()), ("d29ybGQ=".into(), "image/png".into())],
        );
        assert_eq!(m.as_text(), "[2 images]");
        assert_eq!(m.parts.len(), 3);
    }

    #[test]
    fn tool_call_apply_result_unions_arguments_and_sets_state() {
        let mut tc = ToolCallPart::partial("call_1", "add");
        tc.arguments = serde_json::json!({"a": 2});
        tc.apply_result(Some(serde_json::json!({"b": 3})), serde_json::json!(5), false);
        assert_eq!(tc.state, ToolCallState::Result);
        assert_eq!(tc.arguments, serde_json::json!({"a": 2, "b": 3}));
        assert_eq!(tc.result, Some(serde_json::json!(5)));
        assert!(!tc.is_error);
    }

    #[test]
    fn sealed_boundary_is_index_of_last_sealed_part() {
        let mut m = Message::new(
            Role::Assistant,
            vec![Part::text("a"), Part::text("b"), Part::text("c")],
        );
        m.parts[1].metadata = PartMetadata::sealed(Utc::now());
        assert_eq!(m.sealed_boundary(), Some(1));
        assert!(m.is_sealed());
    }

    #[test]
    fn content_eq_ignores_metadata() {
        let mut a = Part::text("same");
        let b = Part::text("same");
        a.metadata = PartMetadata::sealed(Utc::now());
        assert!(a.content_eq(&b));
    }

    #[test]
    fn mark_aborted_sets_stop_reason_and_interrupted_message() {
        let mut m = Message::assistant("partial");
        m.mark_aborted();
        assert_eq!(m.stop_reason, Some(StopReason::Aborted));
        assert_eq!(m.error_message.as_deref(), Some("Interrupted"));
    }

    #[test]
    fn serde_roundtrip_preserves_parts() {
        let m = Message::user("hi");
        let json = serde_json::to_string(&m).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_text(), "hi");
        assert_eq!(back.id, m.id);
    }
}
