pub mod client;
pub mod collect;
pub mod error;
pub mod openai;
pub mod traits;
pub mod util;

#[cfg(any(test, feature = "test-support"))]
pub mod fakes;

pub use client::{EmbeddingClient, EmbeddingModel, StreamingLlmClient};
pub use collect::{collect_json, collect_text, CollectedText};
pub use error::LlmError;
pub use openai::{ChunkStream, OpenAiClient};
pub use traits::{Chunk, Message, MessageRole, StreamOptions, Usage};
