use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScrapingError {
    #[error("task id already registered: {0}")]
    DuplicateTaskId(String),
    #[error("unknown task id: {0}")]
    UnknownTask(String),
    #[error("state mismatch for task {task_id}: expected {expected}, found {found}")]
    StateMismatch {
        task_id: String,
        expected: String,
        found: String,
    },
    #[error("no scraper registered for kind {0:?}")]
    UnknownScraperKind(research_common::types::ScraperKind),
    #[error("scraper failed: {0}")]
    ScraperFailed(String),
    #[error("persistence failed after {attempts} attempts: {reason}")]
    PersistenceFailed { attempts: u32, reason: String },
    #[error("batch {0} not found")]
    UnknownBatch(String),
}

impl From<ScrapingError> for research_common::CoreError {
    fn from(err: ScrapingError) -> Self {
        match err {
            ScrapingError::DuplicateTaskId(id) => research_common::CoreError::DuplicateTaskId(id),
            ScrapingError::StateMismatch {
                task_id,
                expected,
                found,
            } => research_common::CoreError::StateMismatch {
                task_id,
                expected,
                found,
            },
            ScrapingError::ScraperFailed(reason) => research_common::CoreError::ScraperFailed(reason),
            ScrapingError::PersistenceFailed { attempts, reason } => {
                research_common::CoreError::PersistenceFailed { attempts, reason }
            }
            other => research_common::CoreError::Other(anyhow::anyhow!(other.to_string())),
        }
    }
}
