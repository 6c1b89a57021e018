//! Thin wrappers over the chat and embedding providers.
//!
//! `Llm` pins a model and turns provider calls into text, either in one
//! piece or streamed as [`TurnEvent::Chunk`]s with cancellation. `Embedder`
//! produces the single query vector a turn shares across searches.

use procura_core::provider::{EmbeddingRequest, Provider, ProviderRequest};
use procura_core::token::clip;
use procura_core::{Message, ProviderError};
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::turn::{CancelToken, EventSink, TurnError, TurnEvent};

/// Sampling settings for one call.
#[derive(Debug, Clone, Copy)]
pub struct Sampling {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// (frequency, presence)
    pub penalties: Option<(f32, f32)>,
}

impl Sampling {
    pub fn new(temperature: f32) -> Self {
        Self {
            temperature,
            max_tokens: None,
            penalties: None,
        }
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn penalties(mut self, frequency: f32, presence: f32) -> Self {
        self.penalties = Some((frequency, presence));
        self
    }
}

#[derive(Clone)]
pub struct Llm {
    provider: Arc<dyn Provider>,
    model: String,
}

impl Llm {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request(&self, messages: Vec<Message>, sampling: Sampling) -> ProviderRequest {
        let mut request = ProviderRequest::new(&self.model, messages, sampling.temperature);
        if let Some(max) = sampling.max_tokens {
            request = request.with_max_tokens(max);
        }
        if let Some((frequency, presence)) = sampling.penalties {
            request = request.with_penalties(frequency, presence);
        }
        request
    }

    /// One completion, returned as trimmed text.
    pub async fn complete(
        &self,
        messages: Vec<Message>,
        sampling: Sampling,
    ) -> Result<String, ProviderError> {
        let response = self.provider.complete(self.request(messages, sampling)).await?;
        debug!(
            model = %response.model,
            chars = response.message.content.len(),
            "LLM completion"
        );
        Ok(response.message.content.trim().to_string())
    }

    /// Stream a completion, forwarding chunks to `events`.
    ///
    /// Cancellation drops the stream and discards the partial text.
    pub async fn stream(
        &self,
        messages: Vec<Message>,
        sampling: Sampling,
        events: &EventSink,
        cancel: &CancelToken,
    ) -> Result<String, TurnError> {
        cancel.check()?;
        let mut request = self.request(messages, sampling);
        request.stream = true;

        let rx = tokio::select! {
            rx = self.provider.stream(request) => rx?,
            _ = cancel.cancelled() => return Err(TurnError::Cancelled),
        };
        let mut stream = ReceiverStream::new(rx);
        let mut text = String::new();

        loop {
            let next = tokio::select! {
                next = stream.next() => next,
                _ = cancel.cancelled() => return Err(TurnError::Cancelled),
            };
            let Some(chunk) = next else { break };
            let chunk = chunk?;
            if let Some(content) = chunk.content
                && !content.is_empty()
            {
                events.emit(TurnEvent::Chunk { content: content.clone() }).await;
                text.push_str(&content);
            }
            if chunk.done {
                break;
            }
        }

        Ok(text.trim().to_string())
    }
}

#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn Provider>,
    model: String,
    dimensions: usize,
    max_input_chars: usize,
}

impl Embedder {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        dimensions: usize,
        max_input_chars: usize,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            dimensions,
            max_input_chars,
        }
    }

    /// Embed one text, clipped to the input limit.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let request = EmbeddingRequest {
            model: self.model.clone(),
            inputs: vec![clip(text, self.max_input_chars)],
            dimensions: Some(self.dimensions),
        };
        let response = self.provider.embed(request).await?;
        response
            .embeddings
            .into_iter()
            .next()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 200,
                message: "embedding response had no vectors".into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{SequentialMockProvider, StaticEmbedder};

    #[tokio::test]
    async fn complete_applies_sampling() {
        let mock = Arc::new(SequentialMockProvider::texts(&["  respuesta  "]));
        let llm = Llm::new(mock.clone(), "gpt-test");
        let text = llm
            .complete(
                vec![Message::user("hola")],
                Sampling::new(0.2).max_tokens(900).penalties(0.3, 0.2),
            )
            .await
            .unwrap();
        assert_eq!(text, "respuesta");

        let request = &mock.requests()[0];
        assert_eq!(request.model, "gpt-test");
        assert_eq!(request.max_tokens, Some(900));
        assert_eq!(request.frequency_penalty, Some(0.3));
        assert_eq!(request.presence_penalty, Some(0.2));
    }

    #[tokio::test]
    async fn stream_forwards_chunks() {
        let mock = Arc::new(SequentialMockProvider::texts(&["texto completo"]));
        let llm = Llm::new(mock, "m");
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let text = llm
            .stream(
                vec![Message::user("q")],
                Sampling::new(0.0),
                &EventSink::new(tx),
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(text, "texto completo");
        assert!(matches!(rx.recv().await, Some(TurnEvent::Chunk { .. })));
    }

    #[tokio::test]
    async fn stream_stops_when_cancelled() {
        let mock = Arc::new(SequentialMockProvider::texts(&["nunca"]));
        let llm = Llm::new(mock.clone(), "m");
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = llm
            .stream(vec![Message::user("q")], Sampling::new(0.0), &EventSink::none(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TurnError::Cancelled));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn embedder_returns_first_vector() {
        let embedder = Embedder::new(Arc::new(StaticEmbedder::new(vec![0.5, 0.5])), "e", 2, 10);
        assert_eq!(embedder.embed("una pregunta muy larga").await.unwrap(), vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn embedder_without_support_fails() {
        let embedder = Embedder::new(Arc::new(SequentialMockProvider::texts(&[])), "e", 2, 10);
        assert!(embedder.embed("x").await.is_err());
    }
}
