use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("session {0} not found on disk")]
    SessionNotFound(String),
    #[error("research run was cancelled")]
    Cancelled,
    #[error("phase {phase} failed: {reason}")]
    PhaseFailed { phase: String, reason: String },
}

impl From<OrchestratorError> for research_common::CoreError {
    fn from(err: OrchestratorError) -> Self {
        research_common::CoreError::Other(anyhow::anyhow!(err.to_string()))
    }
}
