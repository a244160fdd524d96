use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 调度作业
///
/// JobStore的工作队列条目，只包装提醒ID与触发时间，与Reminder聚合
/// 分离，便于替换JobStore实现而不触碰提醒语义。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: Uuid,
    pub reminder_id: Uuid,
    pub fire_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ScheduledJob {
    pub fn new(reminder_id: Uuid, fire_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            reminder_id,
            fire_at,
            created_at: Utc::now(),
        }
    }

    /// 观察到的延迟
    pub fn lateness(&self, now: DateTime<Utc>) -> Duration {
        now - self.fire_at
    }

    /// 是否超过宽限期（misfire）
    ///
    /// 超期作业依然会被触发，只记录延迟用于观测，绝不静默丢弃。
    pub fn is_misfire(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        self.lateness(now) > grace
    }
}
