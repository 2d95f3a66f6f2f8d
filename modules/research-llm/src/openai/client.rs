use std::pin::Pin;

use async_stream::stream;
use futures::stream::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use tracing::{debug, warn};

use super::types::{ChatRequest, ChatStreamEvent, EmbeddingDatum, EmbeddingRequest, EmbeddingResponse, StreamOptionsWire, WireMessage};
use crate::error::LlmError;
use crate::traits::{Chunk, Message, StreamOptions, Usage};

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk, LlmError>> + Send>>;

/// An OpenAI-compatible chat/embeddings client. `base_url` is configurable
/// so the same client speaks to OpenAI, an Azure deployment, or any
/// provider exposing the same wire format.
pub struct OpenAiClient {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn headers(&self) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| LlmError::ProviderError { status: 0, body: e.to_string() })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// Stream a chat completion. Each SSE `data: {...}` line is parsed into
    /// zero or more `Chunk`s; a `data: [DONE]` line ends the stream cleanly.
    /// A dropped connection mid-stream surfaces as `StreamInterrupted`
    /// rather than silently truncating the output.
    pub fn stream(&self, messages: Vec<Message>, options: StreamOptions) -> ChunkStream {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: options.model.clone(),
            messages: messages.iter().map(WireMessage::from).collect(),
            stream: true,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stream_options: options
                .include_usage
                .then_some(StreamOptionsWire { include_usage: true }),
        };
        let http = self.http.clone();
        let headers = self.headers();

        debug!(model = %options.model, "streaming chat completion request");

        Box::pin(stream! {
            let headers = match headers {
                Ok(h) => h,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let response = match http.post(&url).headers(headers).json(&request).send().await {
                Ok(r) => r,
                Err(e) => {
                    yield Err(LlmError::Transport(e));
                    return;
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 {
                    yield Err(LlmError::RateLimited(body));
                } else {
                    yield Err(LlmError::ProviderError { status: status.as_u16(), body });
                }
                return;
            }

            let mut bytes_stream = response.bytes_stream();
            let mut buffer = String::new();

            loop {
                let next = match bytes_stream.next().await {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(e)) => {
                        yield Err(LlmError::StreamInterrupted(e.to_string()));
                        return;
                    }
                    None => break,
                };
                buffer.push_str(&String::from_utf8_lossy(&next));

                while let Some(boundary) = buffer.find("\n\n") {
                    let event_block: String = buffer.drain(..boundary + 2).collect();
                    for line in event_block.lines() {
                        let Some(data) = line.trim().strip_prefix("data:") else { continue };
                        let data = data.trim();
                        if data == "[DONE]" {
                            return;
                        }
                        if data.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<ChatStreamEvent>(data) {
                            Ok(event) => {
                                if let Some(choice) = event.choices.into_iter().next() {
                                    if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                                        yield Ok(Chunk::Content(content));
                                    }
                                    if let Some(reasoning) = choice.delta.reasoning.filter(|r| !r.is_empty()) {
                                        yield Ok(Chunk::Reasoning(reasoning));
                                    }
                                }
                                if let Some(usage) = event.usage {
                                    yield Ok(Chunk::Usage(Usage {
                                        input_tokens: usage.prompt_tokens,
                                        output_tokens: usage.completion_tokens,
                                        total_tokens: usage.total_tokens,
                                    }));
                                }
                            }
                            Err(e) => warn!(error = %e, "failed to parse SSE chat event, skipping"),
                        }
                    }
                }
            }
        })
    }

    pub async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, LlmError> {
        let mut batch = self.embed_batch(model, std::slice::from_ref(&text.to_string())).await?;
        batch
            .pop()
            .ok_or_else(|| LlmError::EmbeddingUnavailable("empty embedding response".into()))
    }

    pub async fn embed_batch(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let url = format!("{}/embeddings", self.base_url);
        let request = EmbeddingRequest {
            model: model.to_string(),
            input: serde_json::Value::Array(texts.iter().cloned().map(serde_json::Value::String).collect()),
        };

        let response = self.http.post(&url).headers(self.headers()?).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::EmbeddingUnavailable(format!("{status}: {body}")));
        }

        let parsed: EmbeddingResponse = response.json().await?;
        Ok(parsed.data.into_iter().map(|EmbeddingDatum { embedding }| embedding).collect())
    }
}
