//! Shared cancellation flag threaded through a run.
//!
//! The generic, per-node `RunContext<S>` this kernel originally carried here
//! (config/event-sender/abort, parameterized over a node state type) went with
//! the `StateGraph` compiler it was built for — see `crate::graph` and
//! `DESIGN.md`. [`AbortSignal`] is the one piece every surviving caller
//! (`crate::run_context::RunContext`, `crate::registry::ToolCallContext`)
//! still needs, so it stays here as a free-standing primitive.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// §5 "A double-abort within 500 ms aborts the process."
const DOUBLE_ABORT_WINDOW_MILLIS: u64 = 500;
const NO_ABORT_YET: u64 = u64::MAX;

struct AbortState {
    aborted: AtomicBool,
    created_at: Instant,
    last_abort_at_millis: AtomicU64,
}

/// Shared cancellation flag. Cloning an `AbortSignal` clones the `Arc`, so every
/// holder observes the same flag — this is what lets a user abort propagate
/// through the agent loop, the stream merger, tool executors, and OM cycles
/// simultaneously (§5).
#[derive(Clone)]
pub struct AbortSignal(Arc<AbortState>);

impl AbortSignal {
    pub fn new() -> Self {
        Self(Arc::new(AbortState {
            aborted: AtomicBool::new(false),
            created_at: Instant::now(),
            last_abort_at_millis: AtomicU64::new(NO_ABORT_YET),
        }))
    }

    /// Sets the cancellation flag. A second call arriving within 500ms of the
    /// first aborts the *process* rather than returning (§5) — the user hit
    /// cancel twice because the run didn't stop, so escalate past the normal
    /// suspension-point polling.
    pub fn abort(&self) {
        if self.record_abort() {
            std::process::exit(130);
        }
    }

    /// Marks the flag aborted and reports whether this call lands within the
    /// double-abort window, without exiting the process. Split out from
    /// `abort` so the windowing logic is unit-testable.
    fn record_abort(&self) -> bool {
        let now_millis = self.0.created_at.elapsed().as_millis() as u64;
        let previous = self.0.last_abort_at_millis.swap(now_millis, Ordering::SeqCst);
        self.0.aborted.store(true, Ordering::SeqCst);
        previous != NO_ABORT_YET && now_millis.saturating_sub(previous) <= DOUBLE_ABORT_WINDOW_MILLIS
    }

    pub fn is_aborted(&self) -> bool {
        self.0.aborted.load(Ordering::SeqCst)
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for AbortSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AbortSignal").field(&self.is_aborted()).finish()
    }
}
