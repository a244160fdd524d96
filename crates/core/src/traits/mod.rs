pub mod event_bus;
pub mod job_store;
pub mod repository;

pub use event_bus::EventBus;
pub use job_store::JobStore;
pub use repository::{PatternRepository, ReminderRepository, TaskInstanceRepository};
