//! Observational Memory (OM) Engine (§4.G): the three-tier
//! "messages -> observations -> reflection" compaction pipeline that keeps a
//! long-running thread's prompt bounded without losing earlier context.
//!
//! [`engine::OmEngine`] drives the state machine against token counts the
//! agent loop reports; [`config`] carries the thresholds.

pub mod config;
pub mod engine;

pub use config::{ObservationConfig, ObservationScope, ReflectionConfig, TokenBound};
pub use engine::{CycleState, OmEngine, OmRecord, Observer, Reflector};
