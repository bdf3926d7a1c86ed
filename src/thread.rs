//! Thread metadata and the file-lock that keeps a thread single-writer (§3
//! "Thread", §5 "Concurrency").
//!
//! A thread owns a title (generated once, never overwritten — see
//! [`Thread::set_title_if_absent`]) and the observational-memory watermarks
//! [`crate::om`] reads and advances. [`ThreadLock`] is the mutual-exclusion
//! primitive §5 requires so two runs never interleave writes to the same
//! thread; it's grounded on `crate::tools::todo`'s XDG-directory,
//! create-or-fail file idiom rather than an in-process mutex, since a run can
//! be a separate OS process from the one that created the thread.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::om::ObservationScope;

/// Watermarks the OM engine tracks per-thread: what it currently believes the
/// active task is, the last generated summary handed back to the user, and
/// when it last ran a cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadOmState {
    pub current_task: Option<String>,
    pub suggested_response: Option<String>,
    pub last_observed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadMetadata {
    pub om: ThreadOmState,
    /// Persistent half of YOLO mode (§4.H: "set transiently and persistently
    /// (thread setting)"). [`crate::permissions::PermissionRules`] carries the
    /// transient, process-local flag; this is the durable counterpart a
    /// thread-settings store round-trips alongside the rest of
    /// [`ThreadMetadata`].
    #[serde(default)]
    pub yolo: bool,
    #[serde(default)]
    pub extra: serde_json::Value,
}

/// A conversation thread: the unit a run is scoped to and titled against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub title: Option<String>,
    pub resource_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: ThreadMetadata,
}

const MAX_TITLE_CHARS: usize = 80;

impl Thread {
    pub fn new(id: impl Into<String>, resource_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: None,
            resource_id: resource_id.into(),
            created_at: now,
            updated_at: now,
            metadata: ThreadMetadata::default(),
        }
    }

    /// Sets the thread's title if it doesn't already have one, truncating to
    /// 80 characters. A no-op once a title exists — titles are generated
    /// once per thread, never overwritten by a later run (§3).
    pub fn set_title_if_absent(&mut self, title: impl AsRef<str>) {
        if self.title.is_some() {
            return;
        }
        let truncated: String = title.as_ref().chars().take(MAX_TITLE_CHARS).collect();
        self.title = Some(truncated);
        self.updated_at = Utc::now();
    }
}

/// What [`crate::om`] persists per observation-scope key: the rolling
/// observation text, its token cost, how many tokens of raw messages are
/// still unobserved, and how many compaction cycles have run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservationalMemoryRecord {
    pub observations_text: String,
    pub observation_tokens: u64,
    pub pending_tokens: u64,
    pub generation_count: u64,
    pub last_observed_at: Option<DateTime<Utc>>,
}

/// The [`crate::memory::Store`] key an observation record is filed under,
/// selected by the configured [`ObservationScope`] (§4.G): `Resource` shares
/// one record across every thread under the same resource, `Thread` keeps
/// each thread's observations independent.
pub fn om_record_key(scope: ObservationScope, thread: &Thread) -> &str {
    match scope {
        ObservationScope::Resource => &thread.resource_id,
        ObservationScope::Thread => &thread.id,
    }
}

/// A `create_new` file lock on disk, held for the lifetime of a run against a
/// thread. Acquiring it when another process already holds it returns
/// [`AgentError::ThreadLock`] naming the owning pid; dropping it removes the
/// file.
pub struct ThreadLock {
    path: PathBuf,
}

impl ThreadLock {
    pub fn acquire(lock_dir: &Path, thread_id: &str) -> Result<Self, AgentError> {
        std::fs::create_dir_all(lock_dir)
            .map_err(|e| AgentError::Storage(format!("creating lock dir: {e}")))?;
        let path = lock_dir.join(format!("{thread_id}.lock"));
        let pid = std::process::id();

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = write!(file, "{pid}");
                Ok(Self { path })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let owner_pid = std::fs::read_to_string(&path)
                    .ok()
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(0);
                Err(AgentError::ThreadLock {
                    thread_id: thread_id.to_string(),
                    owner_pid,
                })
            }
            Err(e) => Err(AgentError::Storage(format!("acquiring thread lock: {e}"))),
        }
    }
}

impl Drop for ThreadLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_thread_has_no_title_and_matching_timestamps() {
        let thread = Thread::new("t1", "r1");
        assert!(thread.title.is_none());
        assert_eq!(thread.created_at, thread.updated_at);
    }

    #[test]
    fn set_title_if_absent_truncates_to_80_chars() {
        let mut thread = Thread::new("t1", "r1");
        let long = "x".repeat(200);
        thread.set_title_if_absent(&long);
        assert_eq!(thread.title.as_ref().unwrap().len(), 80);
    }

    #[test]
    fn set_title_if_absent_does_not_overwrite_existing() {
        let mut thread = Thread::new("t1", "r1");
        thread.set_title_if_absent("first title");
        thread.set_title_if_absent("second title");
        assert_eq!(thread.title.as_deref(), Some("first title"));
    }

    #[test]
    fn om_record_key_follows_scope() {
        let thread = Thread::new("t1", "r1");
        assert_eq!(om_record_key(ObservationScope::Thread, &thread), "t1");
        assert_eq!(om_record_key(ObservationScope::Resource, &thread), "r1");
    }

    #[test]
    fn lock_rejects_second_acquire_and_releases_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let first = ThreadLock::acquire(dir.path(), "thread-a").unwrap();

        let err = ThreadLock::acquire(dir.path(), "thread-a").unwrap_err();
        assert!(matches!(err, AgentError::ThreadLock { owner_pid, .. } if owner_pid == std::process::id()));

        drop(first);
        let reacquired = ThreadLock::acquire(dir.path(), "thread-a");
        assert!(reacquired.is_ok());
    }
}
