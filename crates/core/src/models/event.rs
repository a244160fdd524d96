use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{SchedulerError, SchedulerResult};
use crate::models::reminder::{CancelReason, NotificationChannel};

/// 事件主题定义
pub mod topics {
    pub const TASK_CREATED: &str = "tasks.task.created";
    pub const TASK_UPDATED: &str = "tasks.task.updated";
    pub const TASK_DELETED: &str = "tasks.task.deleted";
    pub const REMINDER_SCHEDULED: &str = "reminders.reminder.scheduled";
    pub const REMINDER_FIRED: &str = "reminders.reminder.fired";
    pub const REMINDER_CANCELLED: &str = "reminders.reminder.cancelled";
    pub const INSTANCE_GENERATED: &str = "recurring.instance.generated";

    /// 调度器消费的上游主题
    pub const CONSUMED: [&str; 3] = [TASK_CREATED, TASK_UPDATED, TASK_DELETED];
}

/// CloudEvents风格的事件信封
///
/// 所有主题共用同一信封结构；`id` 每个事件唯一，`time` 为UTC。
/// 传输层只保证至少一次投递，消费方必须以自然键幂等处理。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub specversion: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub id: Uuid,
    pub time: DateTime<Utc>,
    pub datacontenttype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub data: Value,
}

impl EventEnvelope {
    pub fn new<T: Serialize>(
        event_type: &str,
        source: &str,
        subject: Option<String>,
        data: &T,
    ) -> SchedulerResult<Self> {
        let data = serde_json::to_value(data)
            .map_err(|e| SchedulerError::Serialization(format!("序列化事件数据失败: {e}")))?;
        Ok(Self {
            specversion: "1.0".to_string(),
            event_type: event_type.to_string(),
            source: source.to_string(),
            id: Uuid::new_v4(),
            time: Utc::now(),
            datacontenttype: "application/json".to_string(),
            subject,
            data,
        })
    }

    /// 解出类型化的事件数据
    pub fn decode<T: DeserializeOwned>(&self) -> SchedulerResult<T> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            SchedulerError::Serialization(format!(
                "反序列化事件数据失败: type={}, id={}: {e}",
                self.event_type, self.id
            ))
        })
    }
}

/// task.created 事件数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCreatedData {
    pub task_id: Uuid,
    pub user_id: Uuid,
    pub due_date: Option<DateTime<Utc>>,
    /// 绝对提醒时间；为空表示该任务不需要提醒
    pub reminder_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notification_channels: Vec<NotificationChannel>,
    #[serde(default)]
    pub is_recurring: bool,
}

/// task.updated 事件中的字段变更集
///
/// 外层Option区分"字段未变更"（缺失）与"字段被清除"（null）：
/// `reminder_time: null` 表示提醒被移除，必须触发取消，不能当作未变更。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskChanges {
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub reminder_time: Option<Option<DateTime<Utc>>>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub due_date: Option<Option<DateTime<Utc>>>,
}

/// 缺失走`default`得到外层`None`；字段存在（含null）则包成`Some`
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl TaskChanges {
    /// 是否涉及提醒相关字段
    pub fn touches_reminder(&self) -> bool {
        self.reminder_time.is_some() || self.due_date.is_some()
    }
}

/// task.updated 事件数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskUpdatedData {
    pub task_id: Uuid,
    pub user_id: Uuid,
    pub changes: TaskChanges,
}

/// task.deleted 事件数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDeletedData {
    pub task_id: Uuid,
    pub user_id: Uuid,
}

/// reminders.reminder.scheduled 事件数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderScheduledData {
    pub reminder_id: Uuid,
    pub task_id: Uuid,
    pub user_id: Uuid,
    pub scheduled_time: DateTime<Utc>,
    pub notification_channels: Vec<NotificationChannel>,
}

/// reminders.reminder.fired 事件数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderFiredData {
    pub reminder_id: Uuid,
    pub task_id: Uuid,
    pub user_id: Uuid,
    pub scheduled_time: DateTime<Utc>,
    pub fired_at: DateTime<Utc>,
    pub notification_channels: Vec<NotificationChannel>,
}

/// reminders.reminder.cancelled 事件数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderCancelledData {
    pub reminder_id: Uuid,
    pub task_id: Uuid,
    pub user_id: Uuid,
    pub reason: CancelReason,
    pub cancelled_at: DateTime<Utc>,
}

/// recurring.instance.generated 事件数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceGeneratedData {
    pub task_id: Uuid,
    pub user_id: Uuid,
    pub recurrence_pattern_id: Uuid,
    pub instance_date: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    /// 实例提醒时间，由模板的提前量换算
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notification_channels: Vec<NotificationChannel>,
}
