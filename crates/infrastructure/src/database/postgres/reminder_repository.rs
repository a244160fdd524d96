use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use timekeeper_core::models::{Reminder, ReminderStatus};
use timekeeper_core::traits::ReminderRepository;
use timekeeper_core::{SchedulerError, SchedulerResult};

const REMINDER_COLUMNS: &str =
    "id, task_id, user_id, scheduled_at, status, channels, created_at, fired_at";

pub struct PostgresReminderRepository {
    pool: PgPool,
}

impl PostgresReminderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_reminder(row: &sqlx::postgres::PgRow) -> SchedulerResult<Reminder> {
        let channels: serde_json::Value = row.try_get("channels")?;
        let channels = serde_json::from_value(channels)
            .map_err(|e| SchedulerError::Serialization(format!("反序列化通知渠道失败: {e}")))?;

        Ok(Reminder {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            user_id: row.try_get("user_id")?,
            scheduled_at: row.try_get("scheduled_at")?,
            status: row.try_get("status")?,
            channels,
            created_at: row.try_get("created_at")?,
            fired_at: row.try_get("fired_at")?,
        })
    }
}

#[async_trait]
impl ReminderRepository for PostgresReminderRepository {
    #[instrument(skip(self, reminder), fields(reminder_id = %reminder.id, task_id = %reminder.task_id))]
    async fn create(&self, reminder: &Reminder) -> SchedulerResult<Reminder> {
        let channels = serde_json::to_value(&reminder.channels)
            .map_err(|e| SchedulerError::Serialization(format!("序列化通知渠道失败: {e}")))?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO reminders (id, task_id, user_id, scheduled_at, status, channels, created_at, fired_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {REMINDER_COLUMNS}
            "#,
        ))
        .bind(reminder.id)
        .bind(reminder.task_id)
        .bind(reminder.user_id)
        .bind(reminder.scheduled_at)
        .bind(reminder.status)
        .bind(channels)
        .bind(reminder.created_at)
        .bind(reminder.fired_at)
        .fetch_one(&self.pool)
        .await?;

        let created = Self::row_to_reminder(&row)?;
        debug!("创建提醒成功: {} (任务 {})", created.id, created.task_id);
        Ok(created)
    }

    async fn find_by_id(&self, id: Uuid) -> SchedulerResult<Option<Reminder>> {
        let row = sqlx::query(&format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_reminder).transpose()
    }

    async fn find_pending_by_task(&self, task_id: Uuid) -> SchedulerResult<Option<Reminder>> {
        let row = sqlx::query(&format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders WHERE task_id = $1 AND status = 'pending'"
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_reminder).transpose()
    }

    #[instrument(skip(self), fields(reminder_id = %id))]
    async fn reschedule_pending(
        &self,
        id: Uuid,
        scheduled_at: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        let result = sqlx::query(
            "UPDATE reminders SET scheduled_at = $2 WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(scheduled_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(reminder_id = %id))]
    async fn transition_to_fired(
        &self,
        id: Uuid,
        fired_at: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        // CAS条件更新：取消与触发竞争时只有一方生效
        let result = sqlx::query(
            "UPDATE reminders SET status = 'fired', fired_at = $2 WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(fired_at)
        .execute(&self.pool)
        .await?;

        let transitioned = result.rows_affected() > 0;
        if !transitioned {
            debug!("提醒 {} 不再处于pending，跳过触发转换", id);
        }
        Ok(transitioned)
    }

    #[instrument(skip(self), fields(reminder_id = %id))]
    async fn transition_to_cancelled(&self, id: Uuid) -> SchedulerResult<bool> {
        let result =
            sqlx::query("UPDATE reminders SET status = 'cancelled' WHERE id = $1 AND status = 'pending'")
                .bind(id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_by_status(&self, status: ReminderStatus) -> SchedulerResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM reminders WHERE status = $1")
            .bind(status)
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("cnt")?;
        Ok(count as u64)
    }
}
