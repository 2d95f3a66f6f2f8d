pub mod control_center;
pub mod error;
pub mod persister;
pub mod queue;
pub mod scraper;
pub mod state_tracker;

pub use control_center::ControlCenter;
pub use error::ScrapingError;
pub use persister::ResultPersister;
pub use queue::TaskQueue;
pub use scraper::{PageScraper, RegisteredScraperFactory, ScraperFactory};
pub use state_tracker::TaskStateTracker;
