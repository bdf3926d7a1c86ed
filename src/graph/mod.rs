//! What survives of a generic, compile-once-run-many `StateGraph` execution
//! kernel once the builder itself is removed: interrupts and the cancellation
//! primitive the agent loop is built directly against.
//!
//! A fuller kernel would add a `Node` abstraction, step routing (`Next`), a
//! generic per-node `RunContext<S>`, retries, and node middleware, all in
//! service of a `StateGraph` a caller assembled at runtime. The agent loop
//! (§4.D) is a fixed state machine instead — there is nothing for a caller to
//! assemble — so [`crate::agent_loop::AgentLoop`] is written directly against
//! [`Interrupt`]/[`GraphInterrupt`] and [`AbortSignal`] rather than through a
//! graph compiler, and the `Node`/`Next`/`RetryPolicy`/`NodeMiddleware`/
//! `Runtime` machinery was trimmed. See `DESIGN.md` for the
//! full rationale.

mod interrupt;
mod run_context;

pub use interrupt::{DefaultInterruptHandler, GraphInterrupt, Interrupt, InterruptHandler};
pub use run_context::AbortSignal;
