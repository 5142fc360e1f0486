//! Provider seam (spec §1/§9: concrete LLM wire formats are explicitly out of
//! scope). `Provider` is the boundary the turn engine drives; a real deployment
//! supplies one implementation per backend API, none of which live here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use threadline_protocol::ToolDescriptor;

/// A single role-tagged message in the model-visible history (spec §4.1 `contents`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// Generation knobs (spec §4.1 `generation_params`).
#[derive(Debug, Clone, Default)]
pub struct GenerationParams {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub include_thoughts: bool,
}

/// A request to drive one streaming generation.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system_prompt: String,
    pub contents: Vec<Turn>,
    pub tools: Vec<ToolDescriptor>,
    pub generation: GenerationParams,
}

/// One part of a streamed response, fed into the turn loop (spec §4.1 step 2).
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental visible text for the in-flight model-text message.
    TextDelta { text: String },
    /// Incremental reasoning text; only emitted when `include_thoughts` is set.
    Thought { text: String },
    /// The model wants to call a tool. Terminates streaming for this turn
    /// iteration (spec §4.1 step 2: "Break out of streaming to step 3").
    FunctionCall {
        name: String,
        args: serde_json::Value,
        thought_signature: Option<String>,
    },
    /// Cumulative usage, reported as it becomes known.
    CumulTokenCount { n: i64 },
    /// Terminal event: generation finished without a further tool call.
    Done { stop_reason: String },
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Stream a generation. Implementations push `StreamEvent`s to `tx` in
    /// production order and return once the stream is exhausted (after a
    /// `FunctionCall` or a `Done`).
    async fn send_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError>;

    /// One-shot, non-streaming generation (used by compression and session
    /// naming, spec §4.1/§4.7 — no tool calls expected).
    async fn send(&self, req: &ChatRequest) -> Result<String, ProviderError> {
        let (tx, mut rx) = mpsc::channel(16);
        self.send_stream(req, tx).await?;
        let mut out = String::new();
        while let Some(event) = rx.recv().await {
            if let StreamEvent::TextDelta { text } = event {
                out.push_str(&text);
            }
        }
        Ok(out)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider returned unparseable output: {0}")]
    Parse(String),

    #[error("operation cancelled")]
    Cancelled,
}

/// Deterministic provider used in tests and local development (spec §9 — no
/// concrete wire format is mandated; this is the one implementation that
/// ships with the core).
pub struct MockProvider {
    pub reply: String,
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send_stream(
        &self,
        _req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let _ = tx
            .send(StreamEvent::TextDelta {
                text: self.reply.clone(),
            })
            .await;
        let _ = tx
            .send(StreamEvent::Done {
                stop_reason: "stop".to_string(),
            })
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_provider_streams_text_then_done() {
        let provider = MockProvider {
            reply: "hello".to_string(),
        };
        let (tx, mut rx) = mpsc::channel(8);
        provider
            .send_stream(
                &ChatRequest {
                    model: "mock".into(),
                    system_prompt: String::new(),
                    contents: vec![],
                    tools: vec![],
                    generation: GenerationParams::default(),
                },
                tx,
            )
            .await
            .unwrap();
        let first = rx.recv().await.unwrap();
        matches!(first, StreamEvent::TextDelta { .. });
        let second = rx.recv().await.unwrap();
        matches!(second, StreamEvent::Done { .. });
    }
}
