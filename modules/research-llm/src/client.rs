//! The streaming LLM contract (C9) and its embedding-provider counterpart.
//! Both are traits so the orchestrator and novelty filter depend on an
//! abstraction, not a concrete provider, and tests can swap in fakes.

use async_trait::async_trait;

use crate::error::LlmError;
use crate::openai::{ChunkStream, OpenAiClient};
use crate::traits::{Message, StreamOptions};

pub trait StreamingLlmClient: Send + Sync {
    fn stream(&self, messages: Vec<Message>, options: StreamOptions) -> ChunkStream;
}

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError>;
}

impl StreamingLlmClient for OpenAiClient {
    fn stream(&self, messages: Vec<Message>, options: StreamOptions) -> ChunkStream {
        OpenAiClient::stream(self, messages, options)
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        OpenAiClient::embed(self, "text-embedding-3-small", text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        OpenAiClient::embed_batch(self, "text-embedding-3-small", texts).await
    }
}

/// An `OpenAiClient` bound to a specific embedding model name, since the
/// model is a deployment choice rather than something the trait method
/// signature should carry on every call.
pub struct EmbeddingModel {
    pub client: OpenAiClient,
    pub model: String,
}

#[async_trait]
impl EmbeddingClient for EmbeddingModel {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.client.embed(&self.model, text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        self.client.embed_batch(&self.model, texts).await
    }
}
