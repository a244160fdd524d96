//! 基础设施层：数据库仓储、事件总线与事件网关的具体实现

pub mod database;
pub mod event_gateway;
pub mod in_memory_bus;
pub mod in_memory_job_store;
pub mod rabbitmq_bus;

pub use database::create_pg_pool;
pub use database::postgres::{
    PostgresJobStore, PostgresPatternRepository, PostgresReminderRepository,
    PostgresTaskInstanceRepository,
};
pub use event_gateway::EventGateway;
pub use in_memory_bus::InMemoryEventBus;
pub use in_memory_job_store::InMemoryJobStore;
pub use rabbitmq_bus::RabbitMqEventBus;
