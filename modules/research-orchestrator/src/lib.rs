pub mod cancel;
pub mod content;
pub mod error;
pub mod novelty;
pub mod orchestrator;
pub mod phases;
pub mod session;

pub use cancel::CancelToken;
pub use content::{ContentProvider, StorageContentProvider};
pub use error::OrchestratorError;
pub use novelty::NoveltyFilter;
pub use orchestrator::{OrchestratorConfig, ResearchOrchestrator};
pub use phases::{Goal, Plan, PlanStep, PhaseContext, UserIntent};
pub use session::ResearchSession;
