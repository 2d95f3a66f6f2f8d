use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("no pending prompt with id {0}")]
    UnknownPrompt(String),
}

impl From<EventBusError> for research_common::CoreError {
    fn from(err: EventBusError) -> Self {
        match err {
            EventBusError::UnknownPrompt(id) => research_common::CoreError::UnknownPrompt(id),
        }
    }
}
