pub mod bus;
pub mod error;
pub mod subscription;

pub use bus::EventBus;
pub use error::EventBusError;
pub use subscription::Subscription;
