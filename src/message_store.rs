//! Message Store (§4.A): the canonical repository for every message in the
//! current run, plus the tagged/untagged system message lists.
//!
//! Builds on [`crate::message::Message`] (the data model) and
//! [`crate::stream_merger`] (the merge algorithm invoked by [`MessageStore::add`]):
//! this module owns ordering, source-bucket membership, recording, and the
//! view projections the prompt builder and UI consume.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::message::{Message, MessageId, Part, PartKind, Role};
use crate::stream_merger;
pub use crate::stream_merger::SourceBucket;

/// One entry in the store's typed operation log, captured between
/// [`MessageStore::start_recording`] and [`MessageStore::stop_recording`] for
/// span attributes / replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RecordedOp {
    Add { message_ids: Vec<MessageId>, source: SourceBucket },
    AddSystem { message_id: MessageId, tag: Option<String> },
    RemoveByIds { ids: Vec<MessageId> },
    Clear,
}

/// One of the four read-only shapes a caller can ask the store for. `Ui` and
/// `Canonical` coincide in this implementation — merges are already applied
/// in place by the time a message lands in the store, so there is no separate
/// "legacy v1" shape to reconcile (recorded as an open-question resolution in
/// `DESIGN.md`: the legacy v1 projection was dropped as having no observable
/// difference from `Canonical` once streaming deltas are pre-merged).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Canonical,
    Ui,
    Prompt,
}

/// Full persisted state of a [`MessageStore`], for [`MessageStore::serialize`]
/// / [`MessageStore::deserialize`] round-trips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedStore {
    messages: Vec<Message>,
    buckets: Vec<(SourceBucket, Vec<MessageId>)>,
    system_tagged: Vec<(String, Message)>,
    system_untagged: Vec<Message>,
}

/// Canonical append/merge log of messages (§4.A).
pub struct MessageStore {
    messages: Vec<Message>,
    buckets: HashMap<SourceBucket, HashSet<MessageId>>,
    system_tagged: HashMap<String, Message>,
    system_untagged: Vec<Message>,
    last_created_at: Option<DateTime<Utc>>,
    recording: Option<Vec<RecordedOp>>,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            buckets: HashMap::new(),
            system_tagged: HashMap::new(),
            system_untagged: Vec::new(),
            last_created_at: None,
            recording: None,
        }
    }

    /// Forces strictly increasing `created_at` values (invariant 3) so a
    /// streaming flood can never collapse two messages onto the same tick.
    /// When `preserve` is set (source = memory, a timestamp recovered from a
    /// prior snapshot) the supplied value is kept as-is and only used to seed
    /// future generation, per §4.A "Ordering".
    fn generate_created_at(&mut self, preferred: Option<DateTime<Utc>>, preserve: bool) -> DateTime<Utc> {
        let candidate = preferred.unwrap_or_else(Utc::now);
        let result = match self.last_created_at {
            Some(last) if !preserve && candidate <= last => last + ChronoDuration::milliseconds(1),
            _ => candidate,
        };
        self.last_created_at = Some(result.max(self.last_created_at.unwrap_or(result)));
        result
    }

    fn record(&mut self, op: RecordedOp) {
        if let Some(log) = &mut self.recording {
            log.push(op);
        }
    }

    /// Accepts one or many already-canonical messages, assigns ids/timestamps
    /// where absent, and merges each into the store via [`crate::stream_merger`].
    /// Fails with [`AgentError::InvalidMessageContent`] if any message carries
    /// neither parts nor any text-bearing content.
    ///
    /// System-role messages arriving from [`SourceBucket::Memory`] are
    /// silently dropped (§4.A "Failure modes": historical data may contain
    /// accidental system messages).
    pub fn add(&mut self, mut incoming: Vec<Message>, source: SourceBucket) -> Result<Vec<MessageId>, AgentError> {
        let mut added_ids = Vec::new();
        for mut message in incoming.drain(..) {
            if message.parts.is_empty() {
                return Err(AgentError::InvalidMessageContent(
                    "message has neither content nor parts".to_string(),
                ));
            }
            if message.role == Role::System && source == SourceBucket::Memory {
                continue;
            }

            let preserve = source == SourceBucket::Memory;
            message.created_at = self.generate_created_at(Some(message.created_at), preserve);

            let merge_target = self
                .messages
                .iter()
                .rposition(|m| stream_merger::should_merge(m, &message, source));

            match merge_target {
                Some(idx) => {
                    let overflow = stream_merger::merge_into(&mut self.messages[idx], message);
                    added_ids.push(self.messages[idx].id.clone());
                    self.bucket_set(source).insert(self.messages[idx].id.clone());
                    if let Some(overflow) = overflow {
                        let overflow_id = overflow.id.clone();
                        self.insert_sorted(overflow);
                        self.bucket_set(source).insert(overflow_id.clone());
                        added_ids.push(overflow_id);
                    }
                }
                None => {
                    let id = message.id.clone();
                    self.insert_sorted(message);
                    self.bucket_set(source).insert(id.clone());
                    added_ids.push(id);
                }
            }
        }
        self.record(RecordedOp::Add {
            message_ids: added_ids.clone(),
            source,
        });
        Ok(added_ids)
    }

    fn insert_sorted(&mut self, message: Message) {
        let pos = self.messages.partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(pos, message);
    }

    fn bucket_set(&mut self, bucket: SourceBucket) -> &mut HashSet<MessageId> {
        self.buckets.entry(bucket).or_default()
    }

    /// Appends a system message to either the tagged or untagged list,
    /// de-duplicating by content fingerprint (the flattened text).
    pub fn add_system(&mut self, message: Message, tag: Option<String>) {
        let fingerprint = message.as_text();
        match &tag {
            Some(tag) => {
                let is_dup = self
                    .system_tagged
                    .get(tag)
                    .is_some_and(|existing| existing.as_text() == fingerprint);
                if !is_dup {
                    self.system_tagged.insert(tag.clone(), message.clone());
                    self.record(RecordedOp::AddSystem {
                        message_id: message.id,
                        tag: Some(tag.clone()),
                    });
                }
            }
            None => {
                let is_dup = self.system_untagged.iter().any(|m| m.as_text() == fingerprint);
                if !is_dup {
                    self.record(RecordedOp::AddSystem {
                        message_id: message.id.clone(),
                        tag: None,
                    });
                    self.system_untagged.push(message);
                }
            }
        }
    }

    /// Removes matching messages from every source bucket.
    pub fn remove_by_ids(&mut self, ids: &[MessageId]) {
        let ids: HashSet<&MessageId> = ids.iter().collect();
        self.messages.retain(|m| !ids.contains(&m.id));
        for set in self.buckets.values_mut() {
            set.retain(|id| !ids.contains(id));
        }
        self.record(RecordedOp::RemoveByIds {
            ids: ids.into_iter().cloned().collect(),
        });
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.buckets.clear();
        self.system_tagged.clear();
        self.system_untagged.clear();
        self.last_created_at = None;
        self.record(RecordedOp::Clear);
    }

    fn bucket_messages(&self, bucket: SourceBucket) -> Vec<&Message> {
        let Some(ids) = self.buckets.get(&bucket) else {
            return Vec::new();
        };
        self.messages.iter().filter(|m| ids.contains(&m.id)).collect()
    }

    pub fn all(&self) -> Vec<&Message> {
        self.messages.iter().collect()
    }

    pub fn memory(&self) -> Vec<&Message> {
        self.bucket_messages(SourceBucket::Memory)
    }

    pub fn input(&self) -> Vec<&Message> {
        self.bucket_messages(SourceBucket::Input)
    }

    pub fn response(&self) -> Vec<&Message> {
        self.bucket_messages(SourceBucket::Response)
    }

    pub fn context(&self) -> Vec<&Message> {
        self.bucket_messages(SourceBucket::Context)
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    /// Index of every bucket a message id belongs to (a message can be tagged
    /// in more than one bucket, e.g. a memory-recalled message also used as
    /// context). Used for the source-bucket-partition invariant (§8 property 4):
    /// the partition only holds strictly when a message was added under a
    /// single bucket, which is the only way [`MessageStore::add`] is called.
    pub fn buckets_of(&self, id: &str) -> Vec<SourceBucket> {
        self.buckets
            .iter()
            .filter(|(_, ids)| ids.contains(id))
            .map(|(bucket, _)| *bucket)
            .collect()
    }

    pub fn start_recording(&mut self) {
        self.recording = Some(Vec::new());
    }

    pub fn stop_recording(&mut self) -> Vec<RecordedOp> {
        self.recording.take().unwrap_or_default()
    }

    /// Flattens system messages (tagged first, insertion order, then
    /// untagged) followed by the requested view's messages rendered as plain
    /// text turns, collapsing adjacent same-role messages into one turn
    /// (a provider quirk for Gemini-style APIs that reject back-to-back
    /// same-role turns).
    pub fn view(&self, view: View) -> Vec<Message> {
        match view {
            View::Canonical | View::Ui => self.messages.clone(),
            View::Prompt => self.prompt_view(),
        }
    }

    fn prompt_view(&self) -> Vec<Message> {
        let mut flattened = Vec::new();
        for m in self.system_tagged.values() {
            flattened.push(m.clone());
        }
        for m in &self.system_untagged {
            flattened.push(m.clone());
        }
        for m in &self.messages {
            flattened.push(m.clone());
        }

        let mut collapsed: Vec<Message> = Vec::new();
        for message in flattened {
            if let Some(last) = collapsed.last_mut() {
                if last.role == message.role && message.role != Role::Assistant {
                    last.parts.extend(message.parts);
                    continue;
                }
            }
            collapsed.push(message);
        }
        collapsed
    }

    pub fn serialize(&self) -> SerializedStore {
        SerializedStore {
            messages: self.messages.clone(),
            buckets: self
                .buckets
                .iter()
                .map(|(b, ids)| (*b, ids.iter().cloned().collect()))
                .collect(),
            system_tagged: self.system_tagged.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            system_untagged: self.system_untagged.clone(),
        }
    }

    pub fn deserialize(snapshot: SerializedStore) -> Self {
        let mut buckets = HashMap::new();
        for (bucket, ids) in snapshot.buckets {
            buckets.insert(bucket, ids.into_iter().collect());
        }
        Self {
            last_created_at: snapshot.messages.iter().map(|m| m.created_at).max(),
            messages: snapshot.messages,
            buckets,
            system_tagged: snapshot.system_tagged.into_iter().collect(),
            system_untagged: snapshot.system_untagged,
            recording: None,
        }
    }
}

/// Builds the `[N images]`-prefixed user message described in §3/§8 and adds
/// it under [`SourceBucket::Input`]. Thin convenience wrapper so call sites
/// that only ever append one user turn don't need to build a `Vec`.
pub fn add_user_text(store: &mut MessageStore, text: impl Into<String>) -> Result<MessageId, AgentError> {
    let message = Message::user(text);
    let id = message.id.clone();
    store.add(vec![message], SourceBucket::Input)?;
    Ok(id)
}

/// Seals every part of `message_id` up to and including `upto_part_index`
/// at `at`, per the OM engine's sealing requirement (§4.G "Sealing").
pub fn seal_message_parts(store: &mut MessageStore, message_id: &str, upto_part_index: usize, at: DateTime<Utc>) {
    if let Some(message) = store.get_mut(message_id) {
        for part in message.parts.iter_mut().take(upto_part_index + 1) {
            if part.metadata.sealed_at.is_none() {
                part.metadata.sealed_at = Some(at);
            }
        }
    }
}

/// Convenience used by tests and the agent loop: appends a plain assistant
/// text part via [`PartKind::Text`] instead of building a [`Part`] manually.
pub fn assistant_text_part(text: impl Into<String>) -> Part {
    Part::new(PartKind::Text { text: text.into() })
}
