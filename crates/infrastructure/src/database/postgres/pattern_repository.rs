use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use timekeeper_core::models::pattern::{DayOfMonth, Frequency};
use timekeeper_core::models::RecurrencePattern;
use timekeeper_core::traits::PatternRepository;
use timekeeper_core::{SchedulerError, SchedulerResult};

const PATTERN_COLUMNS: &str = "id, user_id, template, frequency, recur_interval, days_of_week, \
     day_of_month, cron_expr, end_date, max_occurrences, generated_count, timezone, active, \
     last_generated_at, created_at, updated_at";

pub struct PostgresPatternRepository {
    pool: PgPool,
}

impl PostgresPatternRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_pattern(row: &sqlx::postgres::PgRow) -> SchedulerResult<RecurrencePattern> {
        let template: serde_json::Value = row.try_get("template")?;
        let template = serde_json::from_value(template)
            .map_err(|e| SchedulerError::Serialization(format!("反序列化任务模板失败: {e}")))?;

        let frequency: &str = row.try_get("frequency")?;
        let frequency = Frequency::parse(frequency)?;

        let days_of_week: Vec<i16> = row.try_get("days_of_week")?;
        let days_of_week = days_of_week.into_iter().map(|d| d as u8).collect();

        let day_of_month: Option<String> = row.try_get("day_of_month")?;
        let day_of_month = day_of_month
            .as_deref()
            .map(DayOfMonth::parse)
            .transpose()?;

        let recur_interval: i32 = row.try_get("recur_interval")?;
        let generated_count: i32 = row.try_get("generated_count")?;
        let max_occurrences: Option<i32> = row.try_get("max_occurrences")?;

        Ok(RecurrencePattern {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            template,
            frequency,
            interval: recur_interval as u32,
            days_of_week,
            day_of_month,
            cron_expr: row.try_get("cron_expr")?,
            end_date: row.try_get("end_date")?,
            max_occurrences: max_occurrences.map(|m| m as u32),
            generated_count: generated_count as u32,
            timezone: row.try_get("timezone")?,
            active: row.try_get("active")?,
            last_generated_at: row.try_get("last_generated_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl PatternRepository for PostgresPatternRepository {
    #[instrument(skip(self, pattern), fields(pattern_id = %pattern.id, frequency = pattern.frequency.as_str()))]
    async fn create(&self, pattern: &RecurrencePattern) -> SchedulerResult<RecurrencePattern> {
        // 非法规则在入库前拒绝，不会进入生成引擎
        pattern.validate()?;

        let template = serde_json::to_value(&pattern.template)
            .map_err(|e| SchedulerError::Serialization(format!("序列化任务模板失败: {e}")))?;
        let days_of_week: Vec<i16> = pattern.days_of_week.iter().map(|d| *d as i16).collect();

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO recurrence_patterns
                (id, user_id, template, frequency, recur_interval, days_of_week, day_of_month,
                 cron_expr, end_date, max_occurrences, generated_count, timezone, active,
                 last_generated_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING {PATTERN_COLUMNS}
            "#,
        ))
        .bind(pattern.id)
        .bind(pattern.user_id)
        .bind(template)
        .bind(pattern.frequency.as_str())
        .bind(pattern.interval as i32)
        .bind(days_of_week)
        .bind(pattern.day_of_month.as_ref().map(|d| d.to_db_string()))
        .bind(&pattern.cron_expr)
        .bind(pattern.end_date)
        .bind(pattern.max_occurrences.map(|m| m as i32))
        .bind(pattern.generated_count as i32)
        .bind(&pattern.timezone)
        .bind(pattern.active)
        .bind(pattern.last_generated_at)
        .bind(pattern.created_at)
        .bind(pattern.updated_at)
        .fetch_one(&self.pool)
        .await?;

        let created = Self::row_to_pattern(&row)?;
        debug!("创建重复模式成功: {}", created.id);
        Ok(created)
    }

    async fn find_by_id(&self, id: Uuid) -> SchedulerResult<Option<RecurrencePattern>> {
        let row = sqlx::query(&format!(
            "SELECT {PATTERN_COLUMNS} FROM recurrence_patterns WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_pattern).transpose()
    }

    #[instrument(skip(self), fields(horizon = %horizon))]
    async fn find_generation_due(
        &self,
        horizon: DateTime<Utc>,
        limit: i64,
    ) -> SchedulerResult<Vec<RecurrencePattern>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {PATTERN_COLUMNS} FROM recurrence_patterns
            WHERE active = TRUE
              AND (last_generated_at IS NULL OR last_generated_at < $1)
            ORDER BY created_at
            LIMIT $2
            "#,
        ))
        .bind(horizon)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let patterns: SchedulerResult<Vec<_>> = rows.iter().map(Self::row_to_pattern).collect();
        let patterns = patterns?;
        debug!("查询到 {} 个待生成模式", patterns.len());
        Ok(patterns)
    }

    #[instrument(skip(self), fields(pattern_id = %id, watermark = %watermark))]
    async fn advance_watermark(
        &self,
        id: Uuid,
        watermark: DateTime<Utc>,
        generated: u32,
    ) -> SchedulerResult<()> {
        // GREATEST保证水位线只前移
        let result = sqlx::query(
            r#"
            UPDATE recurrence_patterns
            SET last_generated_at = GREATEST(COALESCE(last_generated_at, 'epoch'::timestamptz), $2),
                generated_count = generated_count + $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(watermark)
        .bind(generated as i32)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::PatternNotFound { id });
        }
        Ok(())
    }

    #[instrument(skip(self), fields(pattern_id = %id))]
    async fn deactivate(&self, id: Uuid) -> SchedulerResult<()> {
        let result = sqlx::query(
            "UPDATE recurrence_patterns SET active = FALSE, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::PatternNotFound { id });
        }
        debug!("重复模式 {} 已停用", id);
        Ok(())
    }
}
