//! Thresholds and scope for the observational-memory cycle (§4.G "Configuration").

use serde::{Deserialize, Serialize};

/// `bufferTokens`/`blockAfter` accept either an absolute token count or a
/// fraction/multiplier of the observation threshold, per §4.G.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TokenBound {
    Absolute(u64),
    Relative(f64),
}

impl TokenBound {
    /// Resolves to an absolute token count given the threshold it's relative to.
    pub fn resolve(self, threshold: u64) -> u64 {
        match self {
            TokenBound::Absolute(n) => n,
            TokenBound::Relative(fraction) => ((threshold as f64) * fraction).round() as u64,
        }
    }
}

/// Which pool of messages an observation cycle scopes over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationScope {
    Resource,
    Thread,
}

/// Thresholds driving the messages -> observations tier (§4.G).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationConfig {
    /// Token count of unobserved messages that triggers a compaction cycle.
    pub observation_tokens: u64,
    /// Watermark (absolute or relative to `observation_tokens`) at which async
    /// buffering begins ahead of the hard threshold.
    pub buffer_tokens: TokenBound,
    /// Fraction of `observation_tokens` the buffer must reach before the
    /// buffered observation is spliced in (§4.G "Buffering").
    pub buffer_activation: f64,
    /// Multiplier or absolute count beyond `observation_tokens` at which the
    /// agent loop blocks on observation instead of running it async.
    pub block_after: TokenBound,
    /// Whether this tier shares its token budget with reflection rather than
    /// tracking it independently.
    pub share_token_budget: bool,
    pub scope: ObservationScope,
}

impl Default for ObservationConfig {
    fn default() -> Self {
        Self {
            observation_tokens: 30_000,
            buffer_tokens: TokenBound::Relative(0.25),
            buffer_activation: 0.8,
            // Defaults to 1.2x trigger when buffering is on.
            block_after: TokenBound::Relative(1.2),
            share_token_budget: false,
            scope: ObservationScope::Thread,
        }
    }
}

impl ObservationConfig {
    pub fn buffer_watermark(&self) -> u64 {
        self.buffer_tokens.resolve(self.observation_tokens)
    }

    pub fn activation_watermark(&self) -> u64 {
        ((self.observation_tokens as f64) * self.buffer_activation).round() as u64
    }

    pub fn block_after_watermark(&self) -> u64 {
        self.block_after.resolve(self.observation_tokens)
    }
}

/// Thresholds driving the observations -> reflection tier (§4.G). Mirrors
/// [`ObservationConfig`]'s buffering fields: "Each has: bufferTokens...
/// bufferActivation... blockAfter" applies to both tiers, not just the first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionConfig {
    /// Token count of accumulated observations that triggers a reflection.
    pub reflection_tokens: u64,
    /// Watermark (absolute or relative to `reflection_tokens`) at which async
    /// buffering begins ahead of the hard threshold.
    pub buffer_tokens: TokenBound,
    /// Fraction of `reflection_tokens` the buffer must reach before the
    /// buffered reflection is spliced in.
    pub buffer_activation: f64,
    /// Multiplier or absolute count beyond `reflection_tokens` at which the
    /// agent loop blocks on reflection instead of running it async.
    pub block_after: TokenBound,
    pub scope: ObservationScope,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            reflection_tokens: 40_000,
            buffer_tokens: TokenBound::Relative(0.25),
            buffer_activation: 0.8,
            block_after: TokenBound::Relative(1.2),
            scope: ObservationScope::Thread,
        }
    }
}

impl ReflectionConfig {
    pub fn buffer_watermark(&self) -> u64 {
        self.buffer_tokens.resolve(self.reflection_tokens)
    }

    pub fn activation_watermark(&self) -> u64 {
        ((self.reflection_tokens as f64) * self.buffer_activation).round() as u64
    }

    pub fn block_after_watermark(&self) -> u64 {
        self.block_after.resolve(self.reflection_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_buffer_tokens_resolve_against_threshold() {
        let cfg = ObservationConfig::default();
        assert_eq!(cfg.buffer_watermark(), 7_500);
        assert_eq!(cfg.activation_watermark(), 24_000);
    }

    #[test]
    fn absolute_bound_ignores_threshold() {
        let bound = TokenBound::Absolute(100);
        assert_eq!(bound.resolve(999), 100);
    }
}
