//! 测试用内存仓储
//!
//! 供scheduler/generator集成测试复用的仓储mock，语义对齐Postgres实现
//! （CAS状态转换、水位线单调、实例唯一约束）。不用于生产部署。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::errors::{SchedulerError, SchedulerResult};
use crate::models::{Reminder, ReminderStatus, RecurrencePattern, TaskInstance};
use crate::traits::{PatternRepository, ReminderRepository, TaskInstanceRepository};

#[derive(Default)]
pub struct MockReminderRepository {
    reminders: Mutex<HashMap<Uuid, Reminder>>,
}

impl MockReminderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, reminder: Reminder) {
        self.reminders.lock().await.insert(reminder.id, reminder);
    }

    pub async fn get(&self, id: Uuid) -> Option<Reminder> {
        self.reminders.lock().await.get(&id).cloned()
    }
}

#[async_trait]
impl ReminderRepository for MockReminderRepository {
    async fn create(&self, reminder: &Reminder) -> SchedulerResult<Reminder> {
        self.reminders
            .lock()
            .await
            .insert(reminder.id, reminder.clone());
        Ok(reminder.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> SchedulerResult<Option<Reminder>> {
        Ok(self.reminders.lock().await.get(&id).cloned())
    }

    async fn find_pending_by_task(&self, task_id: Uuid) -> SchedulerResult<Option<Reminder>> {
        Ok(self
            .reminders
            .lock()
            .await
            .values()
            .find(|r| r.task_id == task_id && r.status == ReminderStatus::Pending)
            .cloned())
    }

    async fn reschedule_pending(
        &self,
        id: Uuid,
        scheduled_at: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        let mut reminders = self.reminders.lock().await;
        match reminders.get_mut(&id) {
            Some(r) if r.status == ReminderStatus::Pending => {
                r.scheduled_at = scheduled_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn transition_to_fired(
        &self,
        id: Uuid,
        fired_at: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        let mut reminders = self.reminders.lock().await;
        match reminders.get_mut(&id) {
            Some(r) if r.status == ReminderStatus::Pending => {
                r.status = ReminderStatus::Fired;
                r.fired_at = Some(fired_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn transition_to_cancelled(&self, id: Uuid) -> SchedulerResult<bool> {
        let mut reminders = self.reminders.lock().await;
        match reminders.get_mut(&id) {
            Some(r) if r.status == ReminderStatus::Pending => {
                r.status = ReminderStatus::Cancelled;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn count_by_status(&self, status: ReminderStatus) -> SchedulerResult<u64> {
        Ok(self
            .reminders
            .lock()
            .await
            .values()
            .filter(|r| r.status == status)
            .count() as u64)
    }
}

#[derive(Default)]
pub struct MockPatternRepository {
    patterns: Mutex<HashMap<Uuid, RecurrencePattern>>,
}

impl MockPatternRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, pattern: RecurrencePattern) {
        self.patterns.lock().await.insert(pattern.id, pattern);
    }

    pub async fn get(&self, id: Uuid) -> Option<RecurrencePattern> {
        self.patterns.lock().await.get(&id).cloned()
    }
}

#[async_trait]
impl PatternRepository for MockPatternRepository {
    async fn create(&self, pattern: &RecurrencePattern) -> SchedulerResult<RecurrencePattern> {
        pattern.validate()?;
        self.patterns
            .lock()
            .await
            .insert(pattern.id, pattern.clone());
        Ok(pattern.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> SchedulerResult<Option<RecurrencePattern>> {
        Ok(self.patterns.lock().await.get(&id).cloned())
    }

    async fn find_generation_due(
        &self,
        horizon: DateTime<Utc>,
        limit: i64,
    ) -> SchedulerResult<Vec<RecurrencePattern>> {
        let patterns = self.patterns.lock().await;
        let mut due: Vec<_> = patterns
            .values()
            .filter(|p| p.active && p.last_generated_at.map_or(true, |w| w < horizon))
            .cloned()
            .collect();
        due.sort_by_key(|p| p.created_at);
        Ok(due.into_iter().take(limit.max(0) as usize).collect())
    }

    async fn advance_watermark(
        &self,
        id: Uuid,
        watermark: DateTime<Utc>,
        generated: u32,
    ) -> SchedulerResult<()> {
        let mut patterns = self.patterns.lock().await;
        let pattern = patterns
            .get_mut(&id)
            .ok_or(SchedulerError::PatternNotFound { id })?;
        // 水位线只前移
        pattern.last_generated_at = Some(match pattern.last_generated_at {
            Some(w) if w > watermark => w,
            _ => watermark,
        });
        pattern.generated_count += generated;
        pattern.updated_at = Utc::now();
        Ok(())
    }

    async fn deactivate(&self, id: Uuid) -> SchedulerResult<()> {
        let mut patterns = self.patterns.lock().await;
        let pattern = patterns
            .get_mut(&id)
            .ok_or(SchedulerError::PatternNotFound { id })?;
        pattern.active = false;
        pattern.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Default)]
pub struct MockTaskInstanceRepository {
    instances: Mutex<Vec<TaskInstance>>,
}

impl MockTaskInstanceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.instances.lock().await.len()
    }
}

#[async_trait]
impl TaskInstanceRepository for MockTaskInstanceRepository {
    async fn insert_if_absent(&self, instance: &TaskInstance) -> SchedulerResult<bool> {
        let mut instances = self.instances.lock().await;
        let exists = instances
            .iter()
            .any(|i| i.pattern_id == instance.pattern_id && i.occurs_at == instance.occurs_at);
        if exists {
            return Ok(false);
        }
        instances.push(instance.clone());
        Ok(true)
    }

    async fn find_by_pattern(&self, pattern_id: Uuid) -> SchedulerResult<Vec<TaskInstance>> {
        let mut found: Vec<_> = self
            .instances
            .lock()
            .await
            .iter()
            .filter(|i| i.pattern_id == pattern_id)
            .cloned()
            .collect();
        found.sort_by_key(|i| i.occurs_at);
        Ok(found)
    }
}
