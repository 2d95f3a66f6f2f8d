use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("no complete JSON object found in stream output")]
    InvalidJson,
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("provider returned an error ({status}): {body}")]
    ProviderError { status: u16, body: String },
    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

impl From<LlmError> for research_common::CoreError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::StreamInterrupted(reason) => research_common::CoreError::StreamInterrupted(reason),
            LlmError::InvalidJson => research_common::CoreError::InvalidJson,
            LlmError::EmbeddingUnavailable(reason) => research_common::CoreError::EmbeddingUnavailable(reason),
            other => research_common::CoreError::Other(anyhow::anyhow!(other.to_string())),
        }
    }
}
