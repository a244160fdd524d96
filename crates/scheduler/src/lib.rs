//! 提醒调度：JobStore触发循环与上游任务事件消费

pub mod event_handlers;
pub mod scheduler;

pub use event_handlers::TaskEventListener;
pub use scheduler::{CycleStats, ReminderScheduler};
