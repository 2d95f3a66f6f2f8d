//! Helper operations built on the raw chunk stream: buffering the
//! full text, or extracting the first complete JSON object out of it.

use futures::StreamExt;

use crate::error::LlmError;
use crate::openai::ChunkStream;
use crate::traits::{Chunk, Usage};
use crate::util::find_first_json_object;

#[derive(Debug)]
pub struct CollectedText {
    pub text: String,
    pub reasoning: String,
    pub usage: Usage,
}

/// Drain `stream`, concatenating content fragments into the full text.
pub async fn collect_text(mut stream: ChunkStream) -> Result<CollectedText, LlmError> {
    let mut text = String::new();
    let mut reasoning = String::new();
    let mut usage = Usage::default();

    while let Some(chunk) = stream.next().await {
        match chunk? {
            Chunk::Content(fragment) => text.push_str(&fragment),
            Chunk::Reasoning(fragment) => reasoning.push_str(&fragment),
            Chunk::Usage(u) => usage = u,
        }
    }

    Ok(CollectedText { text, reasoning, usage })
}

/// Drain `stream` and extract the first complete top-level JSON object from
/// the concatenated content, tolerating leading/trailing prose. Fails with
/// `InvalidJson` if none is found by stream end.
pub async fn collect_json(stream: ChunkStream) -> Result<(serde_json::Value, Usage), LlmError> {
    let collected = collect_text(stream).await?;
    let object_text = find_first_json_object(&collected.text).ok_or(LlmError::InvalidJson)?;
    let value = serde_json::from_str(object_text).map_err(|_| LlmError::InvalidJson)?;
    Ok((value, collected.usage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn stream_of(chunks: Vec<Result<Chunk, LlmError>>) -> ChunkStream {
        Box::pin(stream::iter(chunks))
    }

    #[tokio::test]
    async fn collect_text_concatenates_content_and_keeps_usage() {
        let stream = stream_of(vec![
            Ok(Chunk::Content("Hello, ".into())),
            Ok(Chunk::Content("world.".into())),
            Ok(Chunk::Usage(Usage {
                input_tokens: 10,
                output_tokens: 4,
                total_tokens: 14,
            })),
        ]);
        let collected = collect_text(stream).await.unwrap();
        assert_eq!(collected.text, "Hello, world.");
        assert_eq!(collected.usage.total_tokens, 14);
    }

    #[tokio::test]
    async fn collect_json_tolerates_surrounding_prose() {
        let stream = stream_of(vec![
            Ok(Chunk::Content("Here is the result: ".into())),
            Ok(Chunk::Content("{\"ok\": true}".into())),
            Ok(Chunk::Content(" -- done".into())),
        ]);
        let (value, _) = collect_json(stream).await.unwrap();
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn collect_json_fails_when_no_object_present() {
        let stream = stream_of(vec![Ok(Chunk::Content("no json here".into()))]);
        let err = collect_json(stream).await.unwrap_err();
        assert!(matches!(err, LlmError::InvalidJson));
    }

    #[tokio::test]
    async fn collect_text_propagates_stream_errors() {
        let stream = stream_of(vec![
            Ok(Chunk::Content("partial".into())),
            Err(LlmError::StreamInterrupted("connection reset".into())),
        ]);
        let err = collect_text(stream).await.unwrap_err();
        assert!(matches!(err, LlmError::StreamInterrupted(_)));
    }
}
