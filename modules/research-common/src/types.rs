use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque id, unique per ingestion.
pub type BatchId = String;
/// Opaque id, unique within a batch.
pub type LinkId = String;

// ---------------------------------------------------------------------------
// Scraping task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    VideoTranscript,
    VideoComments,
    ForumThread,
    Article,
}

impl std::fmt::Display for LinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkKind::VideoTranscript => write!(f, "video-transcript"),
            LinkKind::VideoComments => write!(f, "video-comments"),
            LinkKind::ForumThread => write!(f, "forum-thread"),
            LinkKind::Article => write!(f, "article"),
        }
    }
}

impl std::str::FromStr for LinkKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "video-transcript" => Ok(Self::VideoTranscript),
            "video-comments" => Ok(Self::VideoComments),
            "forum-thread" => Ok(Self::ForumThread),
            "article" => Ok(Self::Article),
            other => Err(format!("unknown LinkKind: {other}")),
        }
    }
}

/// The kind of scraper constructor a `LinkKind` maps to. Distinct from
/// `LinkKind` because, e.g., both comment kinds could share one scraper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScraperKind {
    Video,
    Forum,
    Article,
}

impl From<LinkKind> for ScraperKind {
    fn from(kind: LinkKind) -> Self {
        match kind {
            LinkKind::VideoTranscript | LinkKind::VideoComments => ScraperKind::Video,
            LinkKind::ForumThread => ScraperKind::Forum,
            LinkKind::Article => ScraperKind::Article,
        }
    }
}

/// Status DAG: Pending -> (Processing -> (Completed | Failed)) | Cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl TaskStatus {
    /// Completed, Failed, or Cancelled.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether `self -> to` is a legal edge in the status DAG.
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        matches!(
            (self, to),
            (TaskStatus::Pending, TaskStatus::Processing)
                | (TaskStatus::Pending, TaskStatus::Cancelled)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Failed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ScrapingTask {
    pub task_id: String,
    pub batch_id: BatchId,
    pub link_id: LinkId,
    pub url: String,
    pub link_kind: LinkKind,
    pub scraper_kind: ScraperKind,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub assigned_worker_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub artifact_path: Option<String>,
}

impl ScrapingTask {
    pub fn new(
        task_id: impl Into<String>,
        batch_id: impl Into<String>,
        link_id: impl Into<String>,
        url: impl Into<String>,
        link_kind: LinkKind,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            batch_id: batch_id.into(),
            link_id: link_id.into(),
            url: url.into(),
            link_kind,
            scraper_kind: link_kind.into(),
            priority: 0,
            created_at: Utc::now(),
            status: TaskStatus::Pending,
            assigned_worker_id: None,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            artifact_path: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Processing,
    Terminated,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkerStats {
    pub worker_id: String,
    pub state: WorkerState,
    pub current_task: Option<String>,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
}

// ---------------------------------------------------------------------------
// Batch progress
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BatchProgress {
    pub expected_total: u64,
    pub registered_count: u64,
    pub completed: u64,
    pub failed: u64,
    pub in_progress: u64,
    pub pending: u64,
    pub cancelled: u64,
    pub completion_rate: f64,
    pub is_complete: bool,
    pub can_proceed: bool,
}

impl BatchProgress {
    /// Build progress from raw counters, computing the derived fields per
    /// spec: `completion_rate = (completed + failed) / max(expected_total, registered_count)`.
    pub fn compute(
        expected_total: u64,
        registered_count: u64,
        completed: u64,
        failed: u64,
        in_progress: u64,
        pending: u64,
        cancelled: u64,
    ) -> Self {
        let denom = expected_total.max(registered_count).max(1);
        let completion_rate = (completed + failed) as f64 / denom as f64;
        let is_complete = completion_rate >= 1.0 && in_progress == 0 && pending == 0;
        Self {
            expected_total,
            registered_count,
            completed,
            failed,
            in_progress,
            pending,
            cancelled,
            completion_rate,
            is_complete,
            can_proceed: is_complete,
        }
    }
}

// ---------------------------------------------------------------------------
// Artifact / Summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactMetadata {
    pub source: String,
    pub extracted_at: DateTime<Utc>,
    pub word_count: usize,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Artifact {
    pub link_id: LinkId,
    pub link_kind: LinkKind,
    pub url: String,
    pub content: serde_json::Value,
    pub metadata: ArtifactMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Summary {
    pub link_id: LinkId,
    pub transcript_summary: Option<String>,
    pub comments_summary: Option<String>,
}

// ---------------------------------------------------------------------------
// Scratchpad / Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Findings {
    pub summary: String,
    pub points_of_interest: Vec<String>,
    pub analysis_details: String,
    pub article: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScratchpadEntry {
    pub step_id: u32,
    pub findings: Findings,
    pub insights: String,
    pub confidence: f64,
    pub sources: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PhaseArtifact {
    pub phase: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// The research session's persisted state. Cache fields
/// (`cumulative_summary_cache`/`cumulative_summary_valid`) are not part of
/// the serialized form — they're invalidated on load rather than persisted.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionRecord {
    pub session_id: String,
    pub batch_id: BatchId,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub scratchpad: BTreeMap<u32, ScratchpadEntry>,
    pub phase_artifacts: Vec<PhaseArtifact>,
}

impl SessionRecord {
    pub fn new(session_id: impl Into<String>, batch_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            batch_id: batch_id.into(),
            metadata: BTreeMap::new(),
            scratchpad: BTreeMap::new(),
            phase_artifacts: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// User prompt
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UserPrompt {
    pub prompt_id: String,
    pub prompt_text: String,
    pub choices: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub response: Option<String>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl UserPrompt {
    pub fn new(
        prompt_id: impl Into<String>,
        prompt_text: impl Into<String>,
        choices: Option<Vec<String>>,
    ) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            prompt_text: prompt_text.into(),
            choices,
            created_at: Utc::now(),
            response: None,
            responded_at: None,
        }
    }
}
