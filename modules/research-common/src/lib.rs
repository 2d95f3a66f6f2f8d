pub mod config;
pub mod error;
pub mod event;
pub mod paths;
pub mod persist;
pub mod types;

pub use config::Config;
pub use error::{CoreError, CoreResult};
pub use event::{Event, EventPayload};
pub use types::*;
