pub mod event;
pub mod instance;
pub mod job;
pub mod pattern;
pub mod reminder;

pub use event::{
    topics, EventEnvelope, InstanceGeneratedData, ReminderCancelledData, ReminderFiredData,
    ReminderScheduledData, TaskChanges, TaskCreatedData, TaskDeletedData, TaskUpdatedData,
};
pub use instance::TaskInstance;
pub use job::ScheduledJob;
pub use pattern::{DayOfMonth, Frequency, Priority, RecurrencePattern, TaskTemplate};
pub use reminder::{CancelReason, NotificationChannel, Reminder, ReminderStatus};
