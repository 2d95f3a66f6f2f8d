mod client;
mod types;

pub use client::{ChunkStream, OpenAiClient};
