//! The storage contract the core requires of an external persistence layer.
//!
//! Deliberately small: a namespaced key/value store plus an append-only log per
//! key. The concrete backend (SQLite, Postgres, a hosted KV service) is the
//! embedder's responsibility; this crate ships only [`crate::memory::InMemoryStore`]
//! as a reference implementation for tests and single-process use.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A namespace is a path of segments (e.g. `["user-42", "memories"]`) scoping
/// keys so unrelated resources never collide.
pub type Namespace = Vec<String>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

/// A single stored value with its placement and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub namespace: Namespace,
    pub key: String,
    pub value: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Namespaced key/value storage plus an append-only log per key.
///
/// The "log" half backs append-heavy data that's read in order (observational
/// memory's buffered-observation queue, a thread's raw event history) without
/// requiring the embedder to implement full list/filter semantics.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, namespace: &Namespace, key: &str) -> Result<Option<Item>, StoreError>;

    async fn put(&self, namespace: &Namespace, key: &str, value: serde_json::Value) -> Result<(), StoreError>;

    async fn delete(&self, namespace: &Namespace, key: &str) -> Result<(), StoreError>;

    async fn list(&self, namespace: &Namespace) -> Result<Vec<Item>, StoreError>;

    /// Appends one entry to the log at `(namespace, key)`, creating it if absent.
    async fn append(&self, namespace: &Namespace, key: &str, value: serde_json::Value) -> Result<(), StoreError>;

    /// Reads the full log at `(namespace, key)`, in append order.
    async fn read_log(&self, namespace: &Namespace, key: &str) -> Result<Vec<serde_json::Value>, StoreError>;
}
