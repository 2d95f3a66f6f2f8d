use thiserror::Error;

#[derive(Error, Debug)]
pub enum SummarizeError {
    #[error("timed out waiting for summarization completion: {0}")]
    PartialCompletion(String),
    #[error("failed to persist summary after {attempts} attempts: {reason}")]
    PersistenceFailed { attempts: u32, reason: String },
}

impl From<SummarizeError> for research_common::CoreError {
    fn from(err: SummarizeError) -> Self {
        match err {
            SummarizeError::PartialCompletion(reason) => research_common::CoreError::PartialCompletion(reason),
            SummarizeError::PersistenceFailed { attempts, reason } => {
                research_common::CoreError::PersistenceFailed { attempts, reason }
            }
        }
    }
}
