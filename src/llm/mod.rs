//! LLM client abstraction the agent loop drives (§4.D).
//!
//! The agent loop needs a streaming source of [`LlmStreamChunk`]s that the
//! stream merger (§4.B) folds into the in-progress assistant [`Message`];
//! [`LlmClient::invoke_stream`] is the seam. A concrete provider adapter
//! (OpenAI, Anthropic, ...) is an embedder's concern (§1 non-goal) — this
//! crate ships only [`MockLlm`], a fixed-script implementation for tests.

mod mock;

pub use mock::MockLlm;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::AgentError;
use crate::message::Message;

/// Tool choice mode for chat completions: when tools are present, controls
/// whether the model may choose (auto), must not use (none), or must use
/// (required).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ToolChoiceMode {
    #[default]
    Auto,
    None,
    Required,
}

impl std::str::FromStr for ToolChoiceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "none" => Ok(Self::None),
            "required" => Ok(Self::Required),
            _ => Err(format!("unknown tool_choice: {} (use auto, none, or required)", s)),
        }
    }
}

/// Token usage for one LLM call.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One incremental delta from a streaming LLM call. The stream merger (§4.B)
/// consumes these in order and folds them into the in-progress assistant
/// [`Message`]'s parts.
#[derive(Clone, Debug)]
pub enum LlmStreamChunk {
    TextDelta(String),
    ThinkingDelta(String),
    ToolCallStart { call_id: String, tool_name: String },
    ToolCallArgsDelta { call_id: String, delta: String },
    ToolCallArgsReady { call_id: String, arguments: serde_json::Value },
    Usage(LlmUsage),
}

/// Full result of one LLM turn: the finished assistant message plus usage,
/// once every chunk has arrived.
#[derive(Clone, Debug)]
pub struct LlmResponse {
    pub message: Message,
    pub usage: Option<LlmUsage>,
}

/// LLM client the agent loop calls each prompting step.
///
/// `invoke` is the non-streaming entry point; `invoke_stream` additionally
/// emits [`LlmStreamChunk`]s on `chunk_tx` as they're produced, which is what
/// a real run wants (the default implementation just sends the whole message
/// as one chunk after `invoke` returns, which is correct but not streaming).
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn invoke(&self, messages: &[Message]) -> Result<LlmResponse, AgentError>;

    async fn invoke_stream(
        &self,
        messages: &[Message],
        chunk_tx: Option<mpsc::Sender<LlmStreamChunk>>,
    ) -> Result<LlmResponse, AgentError> {
        let response = self.invoke(messages).await?;
        if let Some(tx) = chunk_tx {
            let text = response.message.as_text();
            if !text.is_empty() {
                let _ = tx.send(LlmStreamChunk::TextDelta(text)).await;
            }
            for tc in response.message.tool_calls() {
                let _ = tx
                    .send(LlmStreamChunk::ToolCallStart {
                        call_id: tc.call_id.clone(),
                        tool_name: tc.tool_name.clone(),
                    })
                    .await;
                let _ = tx
                    .send(LlmStreamChunk::ToolCallArgsReady {
                        call_id: tc.call_id.clone(),
                        arguments: tc.arguments.clone(),
                    })
                    .await;
            }
            if let Some(usage) = &response.usage {
                let _ = tx.send(LlmStreamChunk::Usage(usage.clone())).await;
            }
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    struct StubLlm {
        content: String,
    }

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn invoke(&self, _messages: &[Message]) -> Result<LlmResponse, AgentError> {
            Ok(LlmResponse {
                message: Message::new(Role::Assistant, vec![crate::message::Part::text(&self.content)]),
                usage: None,
            })
        }
    }

    #[test]
    fn tool_choice_mode_from_str_parses_known_values() {
        assert_eq!("auto".parse::<ToolChoiceMode>().unwrap(), ToolChoiceMode::Auto);
        assert_eq!("none".parse::<ToolChoiceMode>().unwrap(), ToolChoiceMode::None);
        assert_eq!("required".parse::<ToolChoiceMode>().unwrap(), ToolChoiceMode::Required);
    }

    #[test]
    fn tool_choice_mode_from_str_rejects_unknown_value() {
        let err = "unexpected".parse::<ToolChoiceMode>().unwrap_err();
        assert!(err.contains("unknown tool_choice"));
    }

    #[tokio::test]
    async fn default_invoke_stream_sends_text_delta() {
        let llm = StubLlm { content: "hello".to_string() };
        let (tx, mut rx) = mpsc::channel(4);
        let resp = llm.invoke_stream(&[], Some(tx)).await.unwrap();
        assert_eq!(resp.message.as_text(), "hello");
        match rx.recv().await.expect("one chunk") {
            LlmStreamChunk::TextDelta(t) => assert_eq!(t, "hello"),
            other => panic!("unexpected chunk: {other:?}"),
        }
    }
}
