use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{SchedulerError, SchedulerResult};

/// 提醒状态
///
/// 状态机只允许两条路径：`Pending -> Fired` 和 `Pending -> Cancelled`，
/// 转换不可逆，也不可跳过中间状态。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReminderStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "fired")]
    Fired,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl ReminderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderStatus::Pending => "pending",
            ReminderStatus::Fired => "fired",
            ReminderStatus::Cancelled => "cancelled",
        }
    }

    /// 检查状态转换是否合法
    pub fn can_transition_to(&self, target: ReminderStatus) -> bool {
        matches!(
            (self, target),
            (ReminderStatus::Pending, ReminderStatus::Fired)
                | (ReminderStatus::Pending, ReminderStatus::Cancelled)
        )
    }
}

impl sqlx::Type<sqlx::Postgres> for ReminderStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for ReminderStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match s {
            "pending" => Ok(ReminderStatus::Pending),
            "fired" => Ok(ReminderStatus::Fired),
            "cancelled" => Ok(ReminderStatus::Cancelled),
            _ => Err(format!("Invalid reminder status: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for ReminderStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// 通知渠道
///
/// 原始系统把渠道列表放在无类型的JSON配置里，这里收敛为显式枚举，
/// 在边界处校验后再进入核心逻辑。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannel {
    Email,
    Push,
    Sms,
}

impl NotificationChannel {
    pub fn parse(s: &str) -> SchedulerResult<Self> {
        match s {
            "email" => Ok(NotificationChannel::Email),
            "push" => Ok(NotificationChannel::Push),
            "sms" => Ok(NotificationChannel::Sms),
            other => Err(SchedulerError::InvalidPattern {
                message: format!("不支持的通知渠道: {other}"),
            }),
        }
    }
}

/// 提醒取消原因
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    TaskDeleted,
    ReminderRemoved,
    UserCancelled,
}

/// 提醒
///
/// 绑定在某个任务的到期/提醒时间上的一次性通知计划。
/// `scheduled_at` 为UTC绝对时间（已从模式时区归一化）。
/// 不变式：`fired_at` 有值当且仅当 `status == Fired`。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: Uuid,
    pub task_id: Uuid,
    pub user_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub status: ReminderStatus,
    pub channels: Vec<NotificationChannel>,
    pub created_at: DateTime<Utc>,
    pub fired_at: Option<DateTime<Utc>>,
}

impl Reminder {
    pub fn new(
        task_id: Uuid,
        user_id: Uuid,
        scheduled_at: DateTime<Utc>,
        channels: Vec<NotificationChannel>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            user_id,
            scheduled_at,
            status: ReminderStatus::Pending,
            channels,
            created_at: Utc::now(),
            fired_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ReminderStatus::Pending
    }

    /// 标记为已触发，仅允许从Pending转换
    pub fn mark_fired(&mut self, fired_at: DateTime<Utc>) -> SchedulerResult<()> {
        if !self.status.can_transition_to(ReminderStatus::Fired) {
            return Err(SchedulerError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: ReminderStatus::Fired.as_str().to_string(),
            });
        }
        self.status = ReminderStatus::Fired;
        self.fired_at = Some(fired_at);
        Ok(())
    }

    /// 标记为已取消，仅允许从Pending转换
    pub fn mark_cancelled(&mut self) -> SchedulerResult<()> {
        if !self.status.can_transition_to(ReminderStatus::Cancelled) {
            return Err(SchedulerError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: ReminderStatus::Cancelled.as_str().to_string(),
            });
        }
        self.status = ReminderStatus::Cancelled;
        Ok(())
    }
}
