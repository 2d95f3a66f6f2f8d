use thiserror::Error;

/// Error taxonomy shared across every core component.
///
/// Component-local error enums (e.g. a state tracker's `StateMismatch`)
/// convert into this via `From` so callers at the crate boundary see one
/// error type; components that need to react to a specific kind (C5's
/// assignment loop retrying on `StateMismatch`) match on the component
/// error before it crosses that boundary.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("task id already registered: {0}")]
    DuplicateTaskId(String),

    #[error("state mismatch for task {task_id}: expected {expected}, found {found}")]
    StateMismatch {
        task_id: String,
        expected: String,
        found: String,
    },

    #[error("failed to persist artifact after {attempts} attempts: {reason}")]
    PersistenceFailed { attempts: u32, reason: String },

    #[error("scraper failed: {0}")]
    ScraperFailed(String),

    #[error("no complete JSON object found in stream output")]
    InvalidJson,

    #[error("LLM stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("no pending prompt with id {0}")]
    UnknownPrompt(String),

    #[error("only reached partial completion: {0}")]
    PartialCompletion(String),

    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("io error: {0}")]
    Io(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
