//! Test doubles for `StreamingLlmClient`/`EmbeddingClient`, gated behind
//! `test-support` so downstream crates can depend on them for integration
//! tests without carrying them into release builds.

use async_trait::async_trait;
use futures::stream;

use crate::client::{EmbeddingClient, StreamingLlmClient};
use crate::error::LlmError;
use crate::openai::ChunkStream;
use crate::traits::{Chunk, Message, StreamOptions, Usage};

/// Replays a fixed script of chunks for every call, ignoring the messages
/// and options it was given. Good enough to drive phase runners and the
/// summarization manager deterministically in tests.
pub struct FakeLlmClient {
    pub script: Vec<Chunk>,
}

impl FakeLlmClient {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            script: vec![
                Chunk::Content(body.into()),
                Chunk::Usage(Usage {
                    input_tokens: 1,
                    output_tokens: 1,
                    total_tokens: 2,
                }),
            ],
        }
    }

    pub fn json(value: &serde_json::Value) -> Self {
        Self::text(value.to_string())
    }
}

impl StreamingLlmClient for FakeLlmClient {
    fn stream(&self, _messages: Vec<Message>, _options: StreamOptions) -> ChunkStream {
        let items: Vec<Result<Chunk, LlmError>> = self.script.iter().cloned().map(Ok).collect();
        Box::pin(stream::iter(items))
    }
}

/// Returns a deterministic pseudo-embedding built as a bag-of-words hash:
/// each whitespace token votes for one dimension. Shared vocabulary between
/// two texts pulls their vectors together; disjoint vocabulary does not,
/// which is enough to exercise cosine-similarity thresholds without network
/// calls.
pub struct FakeEmbeddingClient {
    pub dims: usize,
    calls: std::sync::atomic::AtomicUsize,
}

impl FakeEmbeddingClient {
    pub fn new(dims: usize) -> Self {
        Self { dims, calls: std::sync::atomic::AtomicUsize::new(0) }
    }

    /// Number of `embed` calls made so far, for asserting a caller's
    /// embedding cache actually avoids redundant calls.
    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dims];
        for token in text.to_lowercase().split_whitespace() {
            let hash: u32 = token.bytes().fold(2166136261u32, |acc, b| {
                (acc ^ b as u32).wrapping_mul(16777619)
            });
            vector[(hash as usize) % self.dims] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingClient for FakeEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}
