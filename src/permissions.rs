//! Permissions & Approval Gate (§4.H): category/tool/session policy, YOLO
//! mode, and the pause-and-resume contract tool dispatch consults before
//! running a gated tool.
//!
//! Generalized from a fixed three-policy file-tool scheme
//! (`None`/`DestructiveOnly`/`Always`) into a category/tool/session model.
//! [`crate::event_bus::HarnessEvent::ToolApprovalRequired`] is the event a
//! pending decision is announced on.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::registry::ToolCategory;
use crate::thread::Thread;

/// Per-category or per-tool policy. Deny is final at any level; ask yields to
/// the user; allow bypasses the gate entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    Allow,
    Ask,
    Deny,
}

/// Decision the user (or an automated caller) supplies for a pending
/// `tool_approval_required` suspension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Decline,
    AlwaysAllowCategory,
    Yolo,
}

/// Category/tool/session policy plus the dual-mode YOLO flag (§4.H).
///
/// Session grants are in-memory only (cleared on process exit, per spec);
/// persistent per-tool/category overrides are expected to live with thread
/// settings in the embedder's storage layer and are supplied at construction
/// via [`PermissionRules::with_tool_override`] / category policy map.
pub struct PermissionRules {
    category_policy: RwLock<HashMap<ToolCategory, Policy>>,
    tool_overrides: RwLock<HashMap<String, Policy>>,
    session_grants: RwLock<HashSet<ToolCategory>>,
    /// Transient, process-local YOLO (cleared on process exit).
    yolo: AtomicBool,
    /// Persistent half of YOLO, mirrored from an attached thread's
    /// `metadata.yolo` (§4.H "set transiently and persistently (thread
    /// setting)"). `None` until a thread is attached via
    /// [`PermissionRules::attach_thread`].
    thread_yolo: RwLock<Option<bool>>,
}

impl Default for PermissionRules {
    fn default() -> Self {
        let mut category_policy = HashMap::new();
        category_policy.insert(ToolCategory::Read, Policy::Allow);
        category_policy.insert(ToolCategory::Edit, Policy::Ask);
        category_policy.insert(ToolCategory::Execute, Policy::Ask);
        category_policy.insert(ToolCategory::Mcp, Policy::Ask);
        Self {
            category_policy: RwLock::new(category_policy),
            tool_overrides: RwLock::new(HashMap::new()),
            session_grants: RwLock::new(HashSet::new()),
            yolo: AtomicBool::new(false),
            thread_yolo: RwLock::new(None),
        }
    }
}

impl PermissionRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_category_policy(&self, category: ToolCategory, policy: Policy) {
        self.category_policy.write().unwrap().insert(category, policy);
    }

    pub fn set_tool_override(&self, tool_name: impl Into<String>, policy: Policy) {
        self.tool_overrides.write().unwrap().insert(tool_name.into(), policy);
    }

    /// Loads the persisted YOLO flag from `thread.metadata.yolo`. Once
    /// attached, [`PermissionRules::is_yolo`]/[`PermissionRules::set_yolo`]
    /// consult and update this persisted value alongside the transient flag.
    pub fn attach_thread(&self, thread: &Thread) {
        *self.thread_yolo.write().unwrap() = Some(thread.metadata.yolo);
    }

    pub fn detach_thread(&self) {
        *self.thread_yolo.write().unwrap() = None;
    }

    /// Writes the current persisted YOLO value onto `thread`'s metadata, so
    /// the embedder's thread-settings store picks it up on its next save.
    /// No-op if no thread is attached.
    pub fn sync_thread(&self, thread: &mut Thread) {
        if let Some(persisted) = *self.thread_yolo.read().unwrap() {
            thread.metadata.yolo = persisted;
        }
    }

    /// Sets the transient, process-local YOLO flag. If a thread is attached
    /// (§4.H "persistently"), also updates the persisted value — call
    /// [`PermissionRules::sync_thread`] afterward to flush it onto the
    /// `Thread` the caller actually persists.
    pub fn set_yolo(&self, on: bool) {
        self.yolo.store(on, Ordering::SeqCst);
        let mut thread_yolo = self.thread_yolo.write().unwrap();
        if thread_yolo.is_some() {
            *thread_yolo = Some(on);
        }
    }

    /// True if either the transient session flag or the persisted
    /// thread-attached flag is set.
    pub fn is_yolo(&self) -> bool {
        self.yolo.load(Ordering::SeqCst) || self.thread_yolo.read().unwrap().unwrap_or(false)
    }

    /// Adds `category` to this session's grants, so every subsequent tool in
    /// that category skips the gate for the rest of the process (the
    /// `always_allow_category` decision, §4.H).
    pub fn grant_category(&self, category: ToolCategory) {
        self.session_grants.write().unwrap().insert(category);
    }

    fn has_session_grant(&self, category: ToolCategory) -> bool {
        self.session_grants.read().unwrap().contains(&category)
    }

    /// The effective policy for one tool call: YOLO bypasses everything;
    /// a session grant for the tool's category bypasses the gate; otherwise a
    /// category-level `Deny` is final (§4.H "Deny at any level is final") and
    /// cannot be overridden by a narrower per-tool `Allow`/`Ask`; absent a
    /// category `Deny`, a per-tool override wins over the category default.
    pub fn effective_policy(&self, tool_name: &str, category: ToolCategory) -> Policy {
        if self.is_yolo() {
            return Policy::Allow;
        }
        if self.has_session_grant(category) {
            return Policy::Allow;
        }
        let category_policy = *self.category_policy.read().unwrap().get(&category).unwrap_or(&Policy::Ask);
        if category_policy == Policy::Deny {
            return Policy::Deny;
        }
        if let Some(policy) = self.tool_overrides.read().unwrap().get(tool_name) {
            return *policy;
        }
        category_policy
    }

    /// Whether a call requires the caller to pause for an approval decision.
    pub fn requires_approval(&self, tool_name: &str, category: ToolCategory) -> bool {
        self.effective_policy(tool_name, category) == Policy::Ask
    }

    /// Applies a decision received for a suspended call. Returns whether the
    /// call may now proceed.
    pub fn apply_decision(&self, category: ToolCategory, decision: ApprovalDecision) -> bool {
        match decision {
            ApprovalDecision::Approve => true,
            ApprovalDecision::Decline => false,
            ApprovalDecision::AlwaysAllowCategory => {
                self.grant_category(category);
                true
            }
            ApprovalDecision::Yolo => {
                self.set_yolo(true);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_allow_read_and_ask_for_execute() {
        let rules = PermissionRules::new();
        assert_eq!(rules.effective_policy("ls", ToolCategory::Read), Policy::Allow);
        assert_eq!(rules.effective_policy("bash", ToolCategory::Execute), Policy::Ask);
    }

    #[test]
    fn deny_at_category_level_is_final_even_with_tool_override_absent() {
        let rules = PermissionRules::new();
        rules.set_category_policy(ToolCategory::Execute, Policy::Deny);
        assert_eq!(rules.effective_policy("bash", ToolCategory::Execute), Policy::Deny);
    }

    #[test]
    fn category_deny_is_final_even_with_a_conflicting_tool_override() {
        let rules = PermissionRules::new();
        rules.set_category_policy(ToolCategory::Execute, Policy::Deny);
        rules.set_tool_override("bash", Policy::Allow);
        assert_eq!(rules.effective_policy("bash", ToolCategory::Execute), Policy::Deny);
    }

    #[test]
    fn tool_override_wins_over_category_default() {
        let rules = PermissionRules::new();
        rules.set_tool_override("dangerous_edit", Policy::Deny);
        assert_eq!(rules.effective_policy("dangerous_edit", ToolCategory::Edit), Policy::Deny);
    }

    #[test]
    fn always_allow_category_grants_future_calls_in_session() {
        let rules = PermissionRules::new();
        assert!(rules.requires_approval("bash", ToolCategory::Execute));
        assert!(rules.apply_decision(ToolCategory::Execute, ApprovalDecision::AlwaysAllowCategory));
        assert!(!rules.requires_approval("bash", ToolCategory::Execute));
        assert!(!rules.requires_approval("curl", ToolCategory::Execute));
    }

    #[test]
    fn yolo_bypasses_every_category() {
        let rules = PermissionRules::new();
        rules.set_category_policy(ToolCategory::Execute, Policy::Ask);
        rules.set_yolo(true);
        assert_eq!(rules.effective_policy("bash", ToolCategory::Execute), Policy::Allow);
    }

    #[test]
    fn decline_does_not_grant_future_calls() {
        let rules = PermissionRules::new();
        assert!(!rules.apply_decision(ToolCategory::Execute, ApprovalDecision::Decline));
        assert!(rules.requires_approval("bash", ToolCategory::Execute));
    }

    #[test]
    fn attaching_a_thread_with_yolo_persisted_makes_is_yolo_true() {
        let mut thread = Thread::new("t1", "r1");
        thread.metadata.yolo = true;
        let rules = PermissionRules::new();
        assert!(!rules.is_yolo());
        rules.attach_thread(&thread);
        assert!(rules.is_yolo());
    }

    #[test]
    fn set_yolo_while_attached_persists_back_via_sync_thread() {
        let mut thread = Thread::new("t1", "r1");
        let rules = PermissionRules::new();
        rules.attach_thread(&thread);
        rules.set_yolo(true);
        rules.sync_thread(&mut thread);
        assert!(thread.metadata.yolo);
    }

    #[test]
    fn set_yolo_without_attached_thread_does_not_touch_persisted_value() {
        let rules = PermissionRules::new();
        rules.set_yolo(true);
        assert!(rules.is_yolo());

        let mut thread = Thread::new("t1", "r1");
        rules.sync_thread(&mut thread);
        assert!(!thread.metadata.yolo);
    }

    #[test]
    fn detach_thread_drops_the_persisted_contribution() {
        let mut thread = Thread::new("t1", "r1");
        thread.metadata.yolo = true;
        let rules = PermissionRules::new();
        rules.attach_thread(&thread);
        assert!(rules.is_yolo());
        rules.detach_thread();
        assert!(!rules.is_yolo());
    }
}
