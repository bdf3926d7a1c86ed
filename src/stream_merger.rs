//! Stream Merger (§4.B): decides whether an incoming streamed message merges
//! into the last stored message or becomes new, and applies the merge.
//!
//! [`crate::message_store::MessageStore::add`] is the only caller: it looks
//! backward for a merge target with [`should_merge`], then hands both
//! messages to [`merge_into`]. Kept as free functions over `&mut Message`
//! rather than a type of its own — there is no merger *state* beyond the
//! target message itself.

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{Message, MessageId, Part, PartKind, Role, ToolCallState};

/// Provenance partition a stored message belongs to (invariant 4, §3). Lives
/// here rather than in `message_store` because the merge decision itself
/// (`should_merge`, rule iii) is defined in terms of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceBucket {
    Memory,
    Input,
    Response,
    Context,
}

/// Whether `target` carries the marker the spec calls `completionResult` /
/// `isTaskCompleteResult` (§4.B condition iv): a message that represents a
/// finished task result is never merged into further, even mid-run. This is
/// independent of sealing — a sealed-but-not-complete message is still a
/// valid merge target, handled by the seal-split path in `merge_into`.
fn carries_completion_marker(message: &Message) -> bool {
    message.is_task_complete_result
}

/// Merge decision (§4.B "Merge decision", conditions i-vi).
///
/// `network_append`: under network-append mode, a memory-sourced target may
/// not receive new parts (condition vi) — preserved as an explicit parameter
/// per §9's open question rather than inferred from context.
pub fn should_merge_with_mode(target: &Message, incoming: &Message, source: SourceBucket, network_append: bool) -> bool {
    if target.role != Role::Assistant || incoming.role != Role::Assistant {
        return false;
    }
    if target.thread_id != incoming.thread_id {
        return false;
    }
    if source == SourceBucket::Memory {
        return false;
    }
    if carries_completion_marker(target) || carries_completion_marker(incoming) {
        return false;
    }
    if network_append && target.parts.iter().any(|p| p.metadata.sealed_at.is_some()) {
        return false;
    }
    true
}

/// [`should_merge_with_mode`] with `network_append = false`, the default used
/// by [`crate::message_store::MessageStore::add`].
pub fn should_merge(target: &Message, incoming: &Message, source: SourceBucket) -> bool {
    should_merge_with_mode(target, incoming, source, false)
}

/// Index `incoming_index -> target_index` anchor built while reconciling
/// tool-call parts; used to place the non-tool parts around them in order.
struct AnchorMap {
    anchors: Vec<(usize, usize)>,
}

impl AnchorMap {
    fn new() -> Self {
        Self { anchors: Vec::new() }
    }

    fn push(&mut self, incoming_idx: usize, target_idx: usize) {
        self.anchors.push((incoming_idx, target_idx));
    }

    /// Target-index insertion point for an incoming part at `incoming_idx`:
    /// the target index of the nearest preceding anchor, plus one, or the end
    /// of the target if no anchor precedes it yet.
    fn insertion_point(&self, incoming_idx: usize, target_len: usize) -> usize {
        self.anchors
            .iter()
            .filter(|(i, _)| *i < incoming_idx)
            .map(|(_, t)| t + 1)
            .max()
            .unwrap_or(target_len)
    }

    fn left_anchor(&self, incoming_idx: usize) -> usize {
        self.anchors
            .iter()
            .filter(|(i, _)| *i < incoming_idx)
            .map(|(_, t)| t + 1)
            .max()
            .unwrap_or(0)
    }
}

fn is_step_start(part: &Part) -> bool {
    matches!(part.kind, PartKind::StepStart)
}

fn is_tool_call_part(part: &Part) -> bool {
    matches!(part.kind, PartKind::ToolCall(_))
}

/// Applies the merge algorithm (§4.B steps 1-5): folds `incoming`'s parts
/// into `target` in place. Returns the overflow message created when
/// `target` is sealed and some incoming content falls beyond the sealed
/// boundary (step 5 of §4.B "Sealed messages").
pub fn merge_into(target: &mut Message, incoming: Message) -> Option<Message> {
    if target.created_at < incoming.created_at {
        target.created_at = incoming.created_at;
    }

    if target.is_sealed() {
        return merge_sealed(target, incoming);
    }

    merge_unsealed(target, incoming.parts);
    None
}

/// Non-sealed merge path: anchors tool-call results, then splices every
/// other incoming part around them, skipping content-equal duplicates and
/// injecting a synthetic step-start before the first post-tool text.
fn merge_unsealed(target: &mut Message, incoming_parts: Vec<Part>) {
    let mut anchors = AnchorMap::new();

    // Pass 1: resolve tool-call results in place, recording anchors.
    for (i, part) in incoming_parts.iter().enumerate() {
        if let PartKind::ToolCall(incoming_tc) = &part.kind {
            if let Some((t_idx, existing)) = target.parts.iter_mut().enumerate().find_map(|(idx, p)| match &mut p.kind {
                PartKind::ToolCall(tc) if tc.call_id == incoming_tc.call_id => Some((idx, tc)),
                _ => None,
            }) {
                if incoming_tc.state == ToolCallState::Result {
                    existing.apply_result(Some(incoming_tc.arguments.clone()), incoming_tc.result.clone().unwrap_or(serde_json::Value::Null), incoming_tc.is_error);
                } else {
                    existing.args_text_buffer.push_str(&incoming_tc.args_text_buffer);
                    if !matches!(incoming_tc.arguments, serde_json::Value::Null) {
                        existing.arguments = incoming_tc.arguments.clone();
                    }
                    existing.state = incoming_tc.state;
                }
                target.parts[t_idx].metadata.merge_provider_metadata(&part.metadata.provider_metadata);
                anchors.push(i, t_idx);
            }
        }
    }

    // Pass 2: splice every other part around the anchors, in incoming order
    // so later insertions don't invalidate earlier target indices within the
    // same window (we insert back-to-front per window to keep indices
    // stable).
    let mut pending: Vec<(usize, Part)> = Vec::new();
    for (i, part) in incoming_parts.into_iter().enumerate() {
        if is_tool_call_part(&part) && anchors.anchors.iter().any(|(ai, _)| *ai == i) {
            continue;
        }
        let insertion_point = anchors.insertion_point(i, target.parts.len() + pending.len());
        pending.push((insertion_point, part));
    }

    // Insert from the back so earlier insertion points remain valid.
    pending.sort_by_key(|(pos, _)| *pos);
    let mut offset = 0usize;
    for (pos, part) in pending {
        let target_pos = (pos + offset).min(target.parts.len());
        let left = if target_pos > 0 { target_pos - 1 } else { 0 };
        let window_start = left.min(target.parts.len());
        let dup = target.parts[window_start..]
            .iter()
            .any(|existing| existing.content_eq(&part));
        if dup {
            continue;
        }
        if matches!(part.kind, PartKind::Text { .. }) && target_pos > 0 {
            let predecessor_is_tool = is_tool_call_part(&target.parts[target_pos - 1]);
            if predecessor_is_tool {
                target.parts.insert(target_pos, Part::new(PartKind::StepStart));
                offset += 1;
                part_insert(target, target_pos + 1, part);
                offset += 1;
                continue;
            }
        }
        part_insert(target, target_pos, part);
        offset += 1;
    }
}

fn part_insert(target: &mut Message, pos: usize, part: Part) {
    let pos = pos.min(target.parts.len());
    target.parts.insert(pos, part);
}

/// Sealed-target merge path (§4.B "Sealed messages"): splits the incoming
/// delta at the sealed boundary. Parts at or before the boundary are dropped
/// if content-equal to what's already there (stale retransmission); anything
/// beyond is re-homed to a new message with a fresh id and a timestamp
/// strictly greater than the sealed message's.
fn merge_sealed(target: &mut Message, incoming: Message) -> Option<Message> {
    let boundary = target.sealed_boundary().unwrap_or(0);

    let mut overflow_parts = Vec::new();
    for (i, part) in incoming.parts.into_iter().enumerate() {
        if i <= boundary {
            let matches_existing = target.parts.get(i).is_some_and(|existing| existing.content_eq(&part));
            if !matches_existing {
                // Content changed under a sealed prefix: per invariant 5 the
                // sealed region itself must not change, so still drop it,
                // but surface it via overflow so it isn't silently lost.
                overflow_parts.push(part);
            }
        } else {
            overflow_parts.push(part);
        }
    }

    if overflow_parts.is_empty() {
        return None;
    }

    let mut overflow = Message::new(Role::Assistant, overflow_parts);
    overflow.thread_id = target.thread_id.clone();
    overflow.resource_id = target.resource_id.clone();
    overflow.created_at = target.created_at + ChronoDuration::milliseconds(1);
    Some(overflow)
}

/// Re-homes `message_id` by building a fresh id, used by callers (e.g. the
/// message store) that need to mint the new id ahead of calling merge.
pub fn fresh_overflow_id() -> MessageId {
    crate::message::new_message_id()
}
