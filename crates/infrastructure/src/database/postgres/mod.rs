pub mod job_store;
pub mod pattern_repository;
pub mod reminder_repository;
pub mod task_instance_repository;

pub use job_store::PostgresJobStore;
pub use pattern_repository::PostgresPatternRepository;
pub use reminder_repository::PostgresReminderRepository;
pub use task_instance_repository::PostgresTaskInstanceRepository;
