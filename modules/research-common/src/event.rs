//! The tagged event union published on the event bus (C1): one envelope
//! shape, `{ type, batch_id, seq, timestamp, payload }`.
//!
//! Modeled as one outer struct (`Event`) wrapping a `#[serde(tag = "type",
//! content = "payload", rename_all = "snake_case")]` payload enum, the same
//! way `SystemSourceChange`/`SituationChange` tag their per-field change
//! enums: one tag per kind, one shape per variant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{BatchId, LinkKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub batch_id: BatchId,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn new(batch_id: impl Into<String>, seq: u64, payload: EventPayload) -> Self {
        Self {
            batch_id: batch_id.into(),
            seq,
            timestamp: Utc::now(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventPayload {
    ScrapingStatus {
        expected_total: u64,
        registered: u64,
        completed: u64,
        failed: u64,
        in_progress: u64,
        pending: u64,
        completion_rate: f64,
        is_complete: bool,
        can_proceed: bool,
    },
    ScrapeProgress {
        link_id: String,
        stage: String,
        progress: f64,
        message: Option<String>,
    },
    ScrapeComplete {
        link_id: String,
        link_kind: LinkKind,
        success: bool,
        error: Option<String>,
        artifact_path: Option<String>,
    },
    AllScrapingComplete {
        completion_rate: f64,
        registered: u64,
        expected_total: u64,
    },
    SummaryProgress {
        link_id: String,
        stage: String,
        progress: f64,
    },
    SummaryComplete {
        link_id: String,
        success: bool,
        error: Option<String>,
    },
    ResearchPhaseChange {
        phase: String,
        phase_name: String,
        entering: bool,
    },
    ResearchStreamToken {
        phase: String,
        fragment: String,
    },
    ResearchStreamStructured {
        phase: String,
        object: serde_json::Value,
    },
    UserInputRequired {
        prompt_id: String,
        prompt_text: String,
        choices: Option<Vec<String>>,
    },
    WorkflowProgress {
        message: String,
        detail: Option<String>,
    },
    Error {
        where_: String,
        code: String,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_flat_type_tag() {
        let event = Event::new(
            "batch-1",
            42,
            EventPayload::ScrapeComplete {
                link_id: "link-1".into(),
                link_kind: LinkKind::Article,
                success: true,
                error: None,
                artifact_path: Some("batches/batch-1/link-1_article.json".into()),
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "scrape_complete");
        assert_eq!(json["batch_id"], "batch-1");
        assert_eq!(json["seq"], 42);
        assert_eq!(json["payload"]["link_id"], "link-1");
    }
}
