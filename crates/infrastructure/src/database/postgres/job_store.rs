use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use timekeeper_core::models::ScheduledJob;
use timekeeper_core::traits::JobStore;
use timekeeper_core::SchedulerResult;

/// 数据库轮询式作业存储
///
/// 领取时用 `FOR UPDATE SKIP LOCKED` 打租约（claimed_at），
/// 进程在ack前崩溃时，租约过期后作业重新可见，保证至少一次投递。
pub struct PostgresJobStore {
    pool: PgPool,
    claim_lease: Duration,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool, claim_lease_seconds: i64) -> Self {
        Self {
            pool,
            claim_lease: Duration::seconds(claim_lease_seconds),
        }
    }

    fn row_to_job(row: &sqlx::postgres::PgRow) -> SchedulerResult<ScheduledJob> {
        Ok(ScheduledJob {
            id: row.try_get("id")?,
            reminder_id: row.try_get("reminder_id")?,
            fire_at: row.try_get("fire_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(reminder_id = %job.reminder_id, fire_at = %job.fire_at))]
    async fn schedule(&self, job: &ScheduledJob) -> SchedulerResult<()> {
        // 同一提醒重复登记即改期，并清掉旧租约
        sqlx::query(
            r#"
            INSERT INTO scheduled_jobs (id, reminder_id, fire_at, claimed_at, created_at)
            VALUES ($1, $2, $3, NULL, $4)
            ON CONFLICT (reminder_id)
            DO UPDATE SET fire_at = EXCLUDED.fire_at, claimed_at = NULL
            "#,
        )
        .bind(job.id)
        .bind(job.reminder_id)
        .bind(job.fire_at)
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;

        debug!("作业已登记: 提醒 {} @ {}", job.reminder_id, job.fire_at);
        Ok(())
    }

    #[instrument(skip(self), fields(reminder_id = %reminder_id))]
    async fn cancel(&self, reminder_id: Uuid) -> SchedulerResult<()> {
        sqlx::query("DELETE FROM scheduled_jobs WHERE reminder_id = $1")
            .bind(reminder_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn due_before(&self, t: DateTime<Utc>, limit: i64) -> SchedulerResult<Vec<ScheduledJob>> {
        let lease_cutoff = Utc::now() - self.claim_lease;

        let rows = sqlx::query(
            r#"
            UPDATE scheduled_jobs
            SET claimed_at = NOW()
            WHERE id IN (
                SELECT id FROM scheduled_jobs
                WHERE fire_at <= $1
                  AND (claimed_at IS NULL OR claimed_at < $2)
                ORDER BY fire_at
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, reminder_id, fire_at, created_at
            "#,
        )
        .bind(t)
        .bind(lease_cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn ack(&self, job_id: Uuid) -> SchedulerResult<()> {
        sqlx::query("DELETE FROM scheduled_jobs WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn pending_count(&self) -> SchedulerResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM scheduled_jobs")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("cnt")?;
        Ok(count as u64)
    }
}
