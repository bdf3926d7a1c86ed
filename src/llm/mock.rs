//! Fixed-script LLM client for tests: returns the next message in a
//! pre-configured sequence on each `invoke`, cycling back to the last one
//! once exhausted.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{LlmClient, LlmResponse, LlmUsage};
use crate::error::AgentError;
use crate::message::{Message, Role};

/// Replays a fixed script of assistant messages, one per call.
pub struct MockLlm {
    script: Vec<Message>,
    calls: AtomicUsize,
}

impl MockLlm {
    /// A `MockLlm` that always returns the same plain-text response.
    pub fn fixed_text(content: impl Into<String>) -> Self {
        Self::scripted(vec![Message::assistant(content)])
    }

    /// A `MockLlm` that replays `script` in order, repeating the last entry
    /// once exhausted.
    pub fn scripted(script: Vec<Message>) -> Self {
        assert!(!script.is_empty(), "MockLlm script must not be empty");
        Self {
            script,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn invoke(&self, _messages: &[Message]) -> Result<LlmResponse, AgentError> {
        let idx = self.calls.fetch_add(1, Ordering::SeqCst);
        let message = self.script[idx.min(self.script.len() - 1)].clone();
        let usage = Some(LlmUsage {
            prompt_tokens: 0,
            completion_tokens: message.as_text().len() as u32,
            total_tokens: message.as_text().len() as u32,
        });
        debug_assert_eq!(message.role, Role::Assistant);
        Ok(LlmResponse { message, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_text_always_returns_same_content() {
        let llm = MockLlm::fixed_text("hi");
        let a = llm.invoke(&[]).await.unwrap();
        let b = llm.invoke(&[]).await.unwrap();
        assert_eq!(a.message.as_text(), "hi");
        assert_eq!(b.message.as_text(), "hi");
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn scripted_advances_then_repeats_last() {
        let llm = MockLlm::scripted(vec![Message::assistant("one"), Message::assistant("two")]);
        assert_eq!(llm.invoke(&[]).await.unwrap().message.as_text(), "one");
        assert_eq!(llm.invoke(&[]).await.unwrap().message.as_text(), "two");
        assert_eq!(llm.invoke(&[]).await.unwrap().message.as_text(), "two");
    }
}
