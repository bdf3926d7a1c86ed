//! Observational Memory cycle driver (§4.G): messages -> observations ->
//! reflection, with async buffering ahead of the hard threshold so the agent
//! loop rarely blocks on compaction.
//!
//! Built on the same sealing/append discipline the message store's own
//! compaction boundary uses (`MessageStore::seal_message_parts` is reused here
//! verbatim), generalized into the three-tier state machine §4.G describes,
//! since token-threshold compaction has no direct precedent to copy from.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::event_bus::{EventBus, HarnessEvent};
use crate::message::Message;
use crate::om::config::{ObservationConfig, ReflectionConfig};

/// One compaction output: a generated observation or reflection.
///
/// `covered_tokens` is the tier-1 count — how many raw message tokens this
/// record absorbed, used to reset [`OmEngine::unobserved_tokens`].
/// `observation_tokens` is the tier-2 count — the estimated size of `text`
/// itself, used to drive [`OmEngine::should_reflect`] (§4.G "Observations":
/// a separate tier measured independently of raw message volume).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OmRecord {
    pub cycle_id: String,
    pub text: String,
    pub covered_tokens: u64,
    pub observation_tokens: u64,
    pub generation: u64,
}

/// Token estimate for generated text. This crate has no tokenizer of its own
/// (§1: no model weights, no provider adapter) and `record_tokens` already
/// takes a caller-supplied count for raw messages, so this is only used to
/// size the Observer's/Reflector's own output, which the caller cannot have
/// pre-counted.
fn estimate_tokens(text: &str) -> u64 {
    ((text.chars().count() as f64) / 4.0).ceil() as u64
}

/// Produces an observation from the messages accumulated since the last cycle.
#[async_trait]
pub trait Observer: Send + Sync {
    async fn observe(&self, messages: &[Message]) -> Result<String, AgentError>;
}

/// Produces a reflection from the accumulated observations.
#[async_trait]
pub trait Reflector: Send + Sync {
    async fn reflect(&self, observations: &[OmRecord]) -> Result<String, AgentError>;
}

/// State of one observation/reflection cycle, mirrored as [`HarnessEvent::OmStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Buffering,
    Observing,
    Reflecting,
    Blocked,
}

impl CycleState {
    fn as_status(self) -> &'static str {
        match self {
            CycleState::Idle => "idle",
            CycleState::Buffering => "buffering",
            CycleState::Observing => "observing",
            CycleState::Reflecting => "reflecting",
            CycleState::Blocked => "blocked",
        }
    }
}

/// Drives the buffering/observation/reflection cycle for one thread/resource
/// scope. Token accounting is the caller's responsibility ([`OmEngine::record_tokens`]);
/// this keeps the engine independent of any particular tokenizer.
pub struct OmEngine {
    observation_cfg: ObservationConfig,
    reflection_cfg: ReflectionConfig,
    unobserved_tokens: AtomicU64,
    unreflected_tokens: AtomicU64,
    generation: AtomicU64,
    buffered: std::sync::Mutex<Option<OmRecord>>,
    reflection_buffered: std::sync::Mutex<Option<OmRecord>>,
    observations: std::sync::Mutex<VecDeque<OmRecord>>,
    last_buffer_watermark_crossed: AtomicU64,
    last_reflection_buffer_watermark_crossed: AtomicU64,
    events: Option<EventBus>,
}

impl OmEngine {
    pub fn new(observation_cfg: ObservationConfig, reflection_cfg: ReflectionConfig) -> Self {
        Self {
            observation_cfg,
            reflection_cfg,
            unobserved_tokens: AtomicU64::new(0),
            unreflected_tokens: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            buffered: std::sync::Mutex::new(None),
            reflection_buffered: std::sync::Mutex::new(None),
            observations: std::sync::Mutex::new(VecDeque::new()),
            last_buffer_watermark_crossed: AtomicU64::new(0),
            last_reflection_buffer_watermark_crossed: AtomicU64::new(0),
            events: None,
        }
    }

    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    fn emit(&self, event: HarnessEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    fn emit_status(&self, state: CycleState) {
        self.emit(HarnessEvent::OmStatus {
            status: state.as_status().to_string(),
        });
    }

    pub fn unobserved_tokens(&self) -> u64 {
        self.unobserved_tokens.load(Ordering::SeqCst)
    }

    /// Tier-2 accumulated observation-text size, the quantity
    /// `reflection.reflection_tokens` gates against (§4.G "Reflection").
    pub fn unreflected_tokens(&self) -> u64 {
        self.unreflected_tokens.load(Ordering::SeqCst)
    }

    pub fn generation_count(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Accounts for `tokens` worth of newly-ingested, not-yet-observed
    /// content. Crossing a `bufferTokens` watermark multiple triggers an
    /// async buffering pass (§4.G "Buffering": 2500/5000/7500-token
    /// watermarks under the default config each start a fresh buffered
    /// observation covering everything seen so far).
    ///
    /// Returns `true` once a buffering pass should be kicked off by the
    /// caller via [`OmEngine::run_buffered_observation`] (kept synchronous
    /// here and run off the critical path by the caller, e.g. `tokio::spawn`,
    /// exactly as §4.G requires: "no blocking call on the critical path").
    pub fn record_tokens(&self, tokens: u64) -> bool {
        let total = self.unobserved_tokens.fetch_add(tokens, Ordering::SeqCst) + tokens;

        let watermark = self.observation_cfg.buffer_watermark().max(1);
        let crossed = total / watermark;
        let previous = self.last_buffer_watermark_crossed.swap(crossed, Ordering::SeqCst);
        crossed > previous
    }

    /// Whether accumulated tokens have crossed the hard observation threshold
    /// — the agent loop must run (or have already run) an observation before
    /// continuing to grow the unobserved set.
    pub fn should_observe(&self) -> bool {
        self.unobserved_tokens() >= self.observation_cfg.observation_tokens
    }

    /// Whether the unobserved set has grown so far past the threshold that
    /// the agent loop must block on observation rather than deferring to the
    /// buffered async path (§4.G "blockAfter").
    pub fn should_block(&self) -> bool {
        self.unobserved_tokens() >= self.observation_cfg.block_after_watermark()
    }

    pub fn should_reflect(&self) -> bool {
        self.unreflected_tokens.load(Ordering::SeqCst) >= self.reflection_cfg.reflection_tokens
    }

    /// Mirrors [`OmEngine::should_block`] for the reflection tier (§4.G: both
    /// tiers have a `blockAfter`).
    pub fn should_block_reflection(&self) -> bool {
        self.unreflected_tokens.load(Ordering::SeqCst) >= self.reflection_cfg.block_after_watermark()
    }

    /// Mirrors the watermark-crossing check `record_tokens` runs for the
    /// observation tier, polled by the caller after an observation commit
    /// grows `unreflected_tokens` rather than inline, since that growth
    /// happens inside [`OmEngine::observe_now`]/[`OmEngine::activate_buffer`]
    /// rather than a single caller-supplied delta.
    pub fn reflection_buffer_watermark_crossed(&self) -> bool {
        let total = self.unreflected_tokens.load(Ordering::SeqCst);
        let watermark = self.reflection_cfg.buffer_watermark().max(1);
        let crossed = total / watermark;
        let previous = self.last_reflection_buffer_watermark_crossed.swap(crossed, Ordering::SeqCst);
        crossed > previous
    }

    /// Runs an observer over `messages` off the critical path and stores the
    /// result as this cycle's buffered candidate. Does not clear
    /// `unobserved_tokens` — that only happens once the buffer is spliced in
    /// via [`OmEngine::activate_buffer`] or a synchronous observation commits
    /// via [`OmEngine::observe_now`].
    pub async fn run_buffered_observation(
        &self,
        cycle_id: impl Into<String>,
        observer: &dyn Observer,
        messages: &[Message],
    ) {
        let cycle_id = cycle_id.into();
        self.emit_status(CycleState::Buffering);
        self.emit(HarnessEvent::OmBufferingStart { cycle_id: cycle_id.clone() });
        match observer.observe(messages).await {
            Ok(text) => {
                let observation_tokens = estimate_tokens(&text);
                let record = OmRecord {
                    cycle_id: cycle_id.clone(),
                    text,
                    covered_tokens: self.unobserved_tokens(),
                    observation_tokens,
                    generation: self.generation.load(Ordering::SeqCst) + 1,
                };
                *self.buffered.lock().unwrap() = Some(record);
                self.emit(HarnessEvent::OmBufferingEnd { cycle_id });
            }
            Err(err) => {
                self.emit(HarnessEvent::OmBufferingFailed {
                    cycle_id,
                    reason: err.to_string(),
                });
            }
        }
        self.emit_status(CycleState::Idle);
    }

    /// Whether the buffered candidate's coverage is close enough to the
    /// hard threshold's to splice in instead of discarding it and observing
    /// fresh (§4.G "bufferActivation"): the buffer must cover at least
    /// `bufferActivation` of the tokens present when activation is checked.
    pub fn buffer_is_activatable(&self) -> bool {
        let Some(buffered) = self.buffered.lock().unwrap().clone() else {
            return false;
        };
        let current = self.unobserved_tokens();
        if current == 0 {
            return false;
        }
        (buffered.covered_tokens as f64 / current as f64) >= self.observation_cfg.buffer_activation
    }

    /// Splices the currently buffered observation in, committing it to the
    /// observation deque and resetting unobserved-token accounting. The
    /// buffered record's covered tokens become this generation's
    /// `observation_tokens`, satisfying invariant 7's post-reflection bound
    /// relative to `reflection_tokens`.
    pub fn activate_buffer(&self) -> Option<OmRecord> {
        let record = self.buffered.lock().unwrap().take()?;
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.unobserved_tokens
            .fetch_sub(record.covered_tokens.min(self.unobserved_tokens()), Ordering::SeqCst);
        self.unreflected_tokens.fetch_add(record.observation_tokens, Ordering::SeqCst);
        self.last_buffer_watermark_crossed.store(0, Ordering::SeqCst);
        self.observations.lock().unwrap().push_back(record.clone());
        self.emit(HarnessEvent::OmActivation {
            cycle_id: record.cycle_id.clone(),
            observation_tokens: record.observation_tokens,
            generation_count: self.generation.load(Ordering::SeqCst),
        });
        Some(record)
    }

    /// Synchronous observation path used when [`OmEngine::should_block`] is
    /// true: no buffered candidate is usable, so the caller must wait.
    pub async fn observe_now(&self, cycle_id: impl Into<String>, observer: &dyn Observer, messages: &[Message]) -> Result<OmRecord, AgentError> {
        let cycle_id = cycle_id.into();
        self.emit_status(CycleState::Observing);
        self.emit(HarnessEvent::OmObservationStart { cycle_id: cycle_id.clone() });
        let result = observer.observe(messages).await;
        match result {
            Ok(text) => {
                self.generation.fetch_add(1, Ordering::SeqCst);
                let covered = self.unobserved_tokens();
                let observation_tokens = estimate_tokens(&text);
                self.unobserved_tokens.store(0, Ordering::SeqCst);
                self.unreflected_tokens.fetch_add(observation_tokens, Ordering::SeqCst);
                self.last_buffer_watermark_crossed.store(0, Ordering::SeqCst);
                let record = OmRecord {
                    cycle_id: cycle_id.clone(),
                    text,
                    covered_tokens: covered,
                    observation_tokens,
                    generation: self.generation.load(Ordering::SeqCst),
                };
                self.observations.lock().unwrap().push_back(record.clone());
                self.emit(HarnessEvent::OmObservationEnd { cycle_id });
                self.emit_status(CycleState::Idle);
                Ok(record)
            }
            Err(err) => {
                self.emit(HarnessEvent::OmObservationFailed {
                    cycle_id,
                    reason: err.to_string(),
                });
                self.emit_status(CycleState::Idle);
                Err(err)
            }
        }
    }

    /// Rolls every accumulated observation into one reflection, replacing
    /// them (§4.G "Reflection"). Invariant 7's bound — `observation_tokens`
    /// after reflection is at most `reflection.observationTokens * (1+eps)` —
    /// holds because `unreflected_tokens` is reseeded from the *reflected*
    /// text's own estimated size, not from the raw message volume that fed
    /// the prior observations.
    pub async fn reflect_now(&self, cycle_id: impl Into<String>, reflector: &dyn Reflector) -> Result<OmRecord, AgentError> {
        let cycle_id = cycle_id.into();
        self.emit_status(CycleState::Reflecting);
        self.emit(HarnessEvent::OmReflectionStart { cycle_id: cycle_id.clone() });
        let observations: Vec<OmRecord> = self.observations.lock().unwrap().iter().cloned().collect();
        match reflector.reflect(&observations).await {
            Ok(text) => {
                self.generation.fetch_add(1, Ordering::SeqCst);
                let covered = observations.iter().map(|o| o.covered_tokens).sum();
                let observation_tokens = estimate_tokens(&text);
                self.observations.lock().unwrap().clear();
                self.unreflected_tokens.store(observation_tokens, Ordering::SeqCst);
                let record = OmRecord {
                    cycle_id: cycle_id.clone(),
                    text,
                    covered_tokens: covered,
                    observation_tokens,
                    generation: self.generation.load(Ordering::SeqCst),
                };
                self.observations.lock().unwrap().push_back(record.clone());
                self.emit(HarnessEvent::OmReflectionEnd { cycle_id });
                self.emit_status(CycleState::Idle);
                Ok(record)
            }
            Err(err) => {
                self.emit(HarnessEvent::OmReflectionFailed {
                    cycle_id,
                    reason: err.to_string(),
                });
                self.emit_status(CycleState::Idle);
                Err(err)
            }
        }
    }

    pub fn observation_count(&self) -> usize {
        self.observations.lock().unwrap().len()
    }

    /// Reflection-tier mirror of [`OmEngine::run_buffered_observation`]: runs
    /// the reflector off the critical path and stores the result as a
    /// buffered candidate rather than committing it. Does not clear
    /// `unreflected_tokens` or the observation deque — that only happens once
    /// the buffer is spliced in via [`OmEngine::activate_reflection_buffer`]
    /// or a synchronous reflection commits via [`OmEngine::reflect_now`].
    pub async fn run_buffered_reflection(&self, cycle_id: impl Into<String>, reflector: &dyn Reflector) {
        let cycle_id = cycle_id.into();
        self.emit_status(CycleState::Buffering);
        self.emit(HarnessEvent::OmBufferingStart { cycle_id: cycle_id.clone() });
        let observations: Vec<OmRecord> = self.observations.lock().unwrap().iter().cloned().collect();
        match reflector.reflect(&observations).await {
            Ok(text) => {
                let observation_tokens = estimate_tokens(&text);
                let covered = observations.iter().map(|o| o.covered_tokens).sum();
                let record = OmRecord {
                    cycle_id: cycle_id.clone(),
                    text,
                    covered_tokens: covered,
                    observation_tokens,
                    generation: self.generation.load(Ordering::SeqCst) + 1,
                };
                *self.reflection_buffered.lock().unwrap() = Some(record);
                self.emit(HarnessEvent::OmBufferingEnd { cycle_id });
            }
            Err(err) => {
                self.emit(HarnessEvent::OmBufferingFailed {
                    cycle_id,
                    reason: err.to_string(),
                });
            }
        }
        self.emit_status(CycleState::Idle);
    }

    /// Reflection-tier mirror of [`OmEngine::buffer_is_activatable`].
    pub fn reflection_buffer_is_activatable(&self) -> bool {
        let Some(buffered) = self.reflection_buffered.lock().unwrap().clone() else {
            return false;
        };
        let current = self.unreflected_tokens.load(Ordering::SeqCst);
        if current == 0 {
            return false;
        }
        (buffered.observation_tokens as f64 / current as f64) >= self.reflection_cfg.buffer_activation
    }

    /// Reflection-tier mirror of [`OmEngine::activate_buffer`]: splices the
    /// buffered reflection in, replacing the observation deque exactly as
    /// [`OmEngine::reflect_now`] does for the synchronous path.
    pub fn activate_reflection_buffer(&self) -> Option<OmRecord> {
        let record = self.reflection_buffered.lock().unwrap().take()?;
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.observations.lock().unwrap().clear();
        self.unreflected_tokens.store(record.observation_tokens, Ordering::SeqCst);
        self.last_reflection_buffer_watermark_crossed.store(0, Ordering::SeqCst);
        self.observations.lock().unwrap().push_back(record.clone());
        self.emit(HarnessEvent::OmActivation {
            cycle_id: record.cycle_id.clone(),
            observation_tokens: record.observation_tokens,
            generation_count: self.generation.load(Ordering::SeqCst),
        });
        Some(record)
    }
}
