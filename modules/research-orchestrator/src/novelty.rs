//! Embedding-based novelty filter (C11): drops findings that are too
//! similar to something already on the scratchpad, so later phases don't
//! re-report the same point of interest under different wording.

use std::collections::HashMap;
use std::sync::Arc;

use research_llm::EmbeddingClient;
use tracing::warn;

/// Cache key: `(step_id, finding_index)`. A finding's wording can be
/// revised when a step re-runs, so keying on the position in a step's
/// findings (not the text itself) is what lets a prior embedding be reused
/// without ever re-embedding text that has already been seen.
type FindingKey = (u32, usize);

pub struct NoveltyFilter {
    embeddings: Arc<dyn EmbeddingClient>,
    threshold: f64,
    cache: HashMap<FindingKey, Vec<f32>>,
}

impl NoveltyFilter {
    pub fn new(embeddings: Arc<dyn EmbeddingClient>, threshold: f64) -> Self {
        Self { embeddings, threshold, cache: HashMap::new() }
    }

    /// Filters `candidates` (the not-yet-committed findings of `step_id`)
    /// against `prior` (`(step_id, finding_index, text)` triples drawn from
    /// the scratchpad), keeping only findings whose cosine similarity to
    /// every prior finding (and to earlier survivors in this same call)
    /// stays below the threshold. On embedding-provider failure the filter
    /// is advisory: it logs and returns all candidates unfiltered rather
    /// than blocking the phase.
    pub async fn filter(&mut self, step_id: u32, prior: &[(u32, usize, String)], candidates: Vec<String>) -> Vec<String> {
        if candidates.is_empty() {
            return candidates;
        }

        let mut prior_vectors = Vec::with_capacity(prior.len());
        for (prior_step, index, text) in prior {
            match self.embed_cached((*prior_step, *index), text).await {
                Ok(v) => prior_vectors.push(v),
                Err(err) => {
                    warn!(error = %err, "novelty filter: embedding unavailable, retaining all candidates");
                    return candidates;
                }
            }
        }

        let mut kept: Vec<(String, Vec<f32>)> = Vec::new();
        let mut best_rejected: Option<(String, f64)> = None;

        for (index, text) in candidates.into_iter().enumerate() {
            let vector = match self.embed_cached((step_id, index), &text).await {
                Ok(v) => v,
                Err(err) => {
                    warn!(error = %err, "novelty filter: embedding unavailable, retaining all candidates");
                    return kept.into_iter().map(|(t, _)| t).chain(std::iter::once(text)).collect();
                }
            };

            let max_similarity = prior_vectors
                .iter()
                .chain(kept.iter().map(|(_, v)| v))
                .map(|other| cosine_similarity(&vector, other))
                .fold(f64::MIN, f64::max);

            if max_similarity < self.threshold {
                kept.push((text, vector));
            } else {
                let is_better = best_rejected.as_ref().map(|(_, sim)| max_similarity < *sim).unwrap_or(true);
                if is_better {
                    best_rejected = Some((text, max_similarity));
                }
            }
        }

        if kept.is_empty() {
            if let Some((text, _)) = best_rejected {
                return vec![text];
            }
        }

        kept.into_iter().map(|(t, _)| t).collect()
    }

    async fn embed_cached(&mut self, key: FindingKey, text: &str) -> Result<Vec<f32>, research_llm::LlmError> {
        if let Some(vector) = self.cache.get(&key) {
            return Ok(vector.clone());
        }
        let vector = self.embeddings.embed(text).await?;
        self.cache.insert(key, vector.clone());
        Ok(vector)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_llm::fakes::FakeEmbeddingClient;

    #[tokio::test]
    async fn near_duplicate_finding_is_dropped() {
        let embeddings = Arc::new(FakeEmbeddingClient::new(8));
        let mut filter = NoveltyFilter::new(embeddings, 0.85);

        let prior = vec![(1, 0, "the site changed its pricing page layout".to_string())];
        let candidates = vec!["the site changed its pricing page layout".to_string()];

        let kept = filter.filter(2, &prior, candidates).await;
        assert!(kept.is_empty());
    }

    #[tokio::test]
    async fn distinct_finding_survives() {
        let embeddings = Arc::new(FakeEmbeddingClient::new(64));
        let mut filter = NoveltyFilter::new(embeddings, 0.85);

        let prior = vec![(1, 0, "the site changed its pricing page layout".to_string())];
        let candidates = vec!["a competitor announced a new product line".to_string()];

        let kept = filter.filter(2, &prior, candidates).await;
        assert_eq!(kept.len(), 1);
    }

    #[tokio::test]
    async fn when_all_candidates_filtered_the_closest_one_survives() {
        let embeddings = Arc::new(FakeEmbeddingClient::new(8));
        let mut filter = NoveltyFilter::new(embeddings, 0.0);

        let prior = vec![(1, 0, "alpha".to_string())];
        let candidates = vec!["beta".to_string(), "gamma".to_string()];

        let kept = filter.filter(2, &prior, candidates).await;
        assert_eq!(kept.len(), 1);
    }

    #[tokio::test]
    async fn empty_candidates_short_circuit() {
        let embeddings = Arc::new(FakeEmbeddingClient::new(8));
        let mut filter = NoveltyFilter::new(embeddings, 0.85);
        let kept = filter.filter(1, &[], vec![]).await;
        assert!(kept.is_empty());
    }

    #[tokio::test]
    async fn prior_findings_are_never_re_embedded_across_calls() {
        let embeddings = Arc::new(FakeEmbeddingClient::new(8));
        let mut filter = NoveltyFilter::new(embeddings.clone(), 0.0);

        let prior = vec![(1, 0, "alpha".to_string())];
        filter.filter(2, &prior, vec!["beta".to_string()]).await;
        let calls_after_first = embeddings.call_count();
        filter.filter(3, &prior, vec!["gamma".to_string()]).await;
        let calls_after_second = embeddings.call_count();

        // The (step 1, index 0) prior is looked up by key, not re-embedded,
        // on the second call: only the new candidate adds an embed call.
        assert_eq!(calls_after_second - calls_after_first, 1);
    }
}
