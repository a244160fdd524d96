use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use timekeeper_core::models::pattern::Priority;
use timekeeper_core::models::TaskInstance;
use timekeeper_core::traits::TaskInstanceRepository;
use timekeeper_core::{SchedulerError, SchedulerResult};

pub struct PostgresTaskInstanceRepository {
    pool: PgPool,
}

impl PostgresTaskInstanceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_instance(row: &sqlx::postgres::PgRow) -> SchedulerResult<TaskInstance> {
        let priority: &str = row.try_get("priority")?;
        let priority = match priority {
            "high" => Priority::High,
            "medium" => Priority::Medium,
            "low" => Priority::Low,
            other => {
                return Err(SchedulerError::DatabaseOperation(format!(
                    "无效的优先级: {other}"
                )))
            }
        };

        Ok(TaskInstance {
            id: row.try_get("id")?,
            instance_id: row.try_get("instance_id")?,
            pattern_id: row.try_get("pattern_id")?,
            user_id: row.try_get("user_id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            priority,
            occurs_at: row.try_get("occurs_at")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn priority_str(priority: Priority) -> &'static str {
        match priority {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

#[async_trait]
impl TaskInstanceRepository for PostgresTaskInstanceRepository {
    #[instrument(skip(self, instance), fields(pattern_id = %instance.pattern_id, occurs_at = %instance.occurs_at))]
    async fn insert_if_absent(&self, instance: &TaskInstance) -> SchedulerResult<bool> {
        // (pattern_id, occurs_at) 唯一约束兜底，并发/重复运行不会产生重复实例
        let result = sqlx::query(
            r#"
            INSERT INTO task_instances
                (id, instance_id, pattern_id, user_id, title, description, priority, occurs_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (pattern_id, occurs_at) DO NOTHING
            "#,
        )
        .bind(instance.id)
        .bind(instance.instance_id)
        .bind(instance.pattern_id)
        .bind(instance.user_id)
        .bind(&instance.title)
        .bind(&instance.description)
        .bind(Self::priority_str(instance.priority))
        .bind(instance.occurs_at)
        .bind(instance.created_at)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() > 0;
        if !inserted {
            debug!(
                "任务实例已存在，跳过: pattern={}, occurs_at={}",
                instance.pattern_id, instance.occurs_at
            );
        }
        Ok(inserted)
    }

    async fn find_by_pattern(&self, pattern_id: Uuid) -> SchedulerResult<Vec<TaskInstance>> {
        let rows = sqlx::query(
            r#"
            SELECT id, instance_id, pattern_id, user_id, title, description, priority, occurs_at, created_at
            FROM task_instances
            WHERE pattern_id = $1
            ORDER BY occurs_at
            "#,
        )
        .bind(pattern_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_instance).collect()
    }
}
