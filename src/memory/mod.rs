//! # Memory: Checkpointing and the Key/Value-Plus-Log Store
//!
//! [`Checkpointer`] + [`Store`] for persistence.
//!
//! ## Overview
//!
//! The memory module provides two distinct capabilities:
//!
//! 1. **Checkpointer** — per-thread state snapshots for resumable runs. Keys
//!    checkpoints by `(thread_id, checkpoint_ns, checkpoint_id)`.
//! 2. **Store** — namespaced key/value storage plus an append-only log per
//!    key, for data an embedder wants to persist across runs (observational
//!    memory summaries, long-term facts) without this crate dictating a
//!    concrete storage engine.
//!
//! ## Config
//!
//! [`RunnableConfig`] names the run a checkpoint or store lookup scopes to.
//! When using a checkpointer:
//! - `thread_id`: required. Identifies the conversation/thread.
//! - `checkpoint_id`: optional. Load a specific checkpoint.
//! - `checkpoint_ns`: optional namespace for subgraphs.
//! - `user_id`: used by `Store` for multi-tenant isolation.
//!
//! Both traits ship only an in-memory reference implementation
//! ([`MemorySaver`], [`InMemoryStore`]) — a durable backend (SQLite, Postgres,
//! a hosted KV service) is the embedder's responsibility to provide against
//! the same trait.

mod checkpoint;
mod checkpointer;
mod config;
mod in_memory_store;
mod memory_saver;
mod store;

pub use checkpoint::{Checkpoint, CheckpointListItem, CheckpointMetadata, CheckpointSource};
pub use checkpointer::{CheckpointError, Checkpointer};
pub use config::RunnableConfig;
pub use in_memory_store::InMemoryStore;
pub use memory_saver::MemorySaver;
pub use store::{Item, Namespace, Store, StoreError};
