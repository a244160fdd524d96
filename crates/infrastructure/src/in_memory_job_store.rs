use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use timekeeper_core::models::ScheduledJob;
use timekeeper_core::traits::JobStore;
use timekeeper_core::SchedulerResult;

struct JobEntry {
    job: ScheduledJob,
    claimed_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct StoreState {
    jobs: HashMap<Uuid, JobEntry>,
    // 提醒ID -> 作业ID，用于upsert和取消
    by_reminder: HashMap<Uuid, Uuid>,
}

/// 内存作业存储
///
/// 用于嵌入式单进程部署和测试。语义与数据库实现一致：
/// 领取打租约、ack前崩溃（此处为不ack）会在租约过期后重新投递。
/// 不跨进程持久化。
pub struct InMemoryJobStore {
    state: Mutex<StoreState>,
    claim_lease: Duration,
}

impl InMemoryJobStore {
    pub fn new(claim_lease_seconds: i64) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            claim_lease: Duration::seconds(claim_lease_seconds),
        }
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new(300)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn schedule(&self, job: &ScheduledJob) -> SchedulerResult<()> {
        let mut state = self.state.lock().await;

        if let Some(existing_id) = state.by_reminder.get(&job.reminder_id).copied() {
            // 同一提醒重复登记即改期
            if let Some(entry) = state.jobs.get_mut(&existing_id) {
                entry.job.fire_at = job.fire_at;
                entry.claimed_at = None;
                debug!("作业改期: 提醒 {} -> {}", job.reminder_id, job.fire_at);
                return Ok(());
            }
        }

        state.by_reminder.insert(job.reminder_id, job.id);
        state.jobs.insert(
            job.id,
            JobEntry {
                job: job.clone(),
                claimed_at: None,
            },
        );
        Ok(())
    }

    async fn cancel(&self, reminder_id: Uuid) -> SchedulerResult<()> {
        let mut state = self.state.lock().await;
        if let Some(job_id) = state.by_reminder.remove(&reminder_id) {
            state.jobs.remove(&job_id);
            debug!("作业已取消: 提醒 {}", reminder_id);
        }
        Ok(())
    }

    async fn due_before(&self, t: DateTime<Utc>, limit: i64) -> SchedulerResult<Vec<ScheduledJob>> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let lease_cutoff = now - self.claim_lease;

        let mut due: Vec<Uuid> = state
            .jobs
            .iter()
            .filter(|(_, entry)| {
                entry.job.fire_at <= t
                    && entry.claimed_at.map_or(true, |claimed| claimed < lease_cutoff)
            })
            .map(|(id, _)| *id)
            .collect();

        due.sort_by_key(|id| state.jobs[id].job.fire_at);
        due.truncate(limit.max(0) as usize);

        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            if let Some(entry) = state.jobs.get_mut(&id) {
                entry.claimed_at = Some(now);
                claimed.push(entry.job.clone());
            }
        }
        Ok(claimed)
    }

    async fn ack(&self, job_id: Uuid) -> SchedulerResult<()> {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.jobs.remove(&job_id) {
            state.by_reminder.remove(&entry.job.reminder_id);
        }
        Ok(())
    }

    async fn pending_count(&self) -> SchedulerResult<u64> {
        let state = self.state.lock().await;
        Ok(state.jobs.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schedule_and_due_scan() {
        let store = InMemoryJobStore::default();
        let now = Utc::now();

        let due_job = ScheduledJob::new(Uuid::new_v4(), now - Duration::seconds(5));
        let future_job = ScheduledJob::new(Uuid::new_v4(), now + Duration::hours(1));
        store.schedule(&due_job).await.unwrap();
        store.schedule(&future_job).await.unwrap();

        let due = store.due_before(now, 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, due_job.id);

        // 租约内不会重复领取
        let again = store.due_before(now, 10).await.unwrap();
        assert!(again.is_empty());

        store.ack(due_job.id).await.unwrap();
        assert_eq!(store.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unacked_job_redelivered_after_lease() {
        let store = InMemoryJobStore::new(0);
        let now = Utc::now();

        let job = ScheduledJob::new(Uuid::new_v4(), now - Duration::seconds(5));
        store.schedule(&job).await.unwrap();

        let first = store.due_before(now, 10).await.unwrap();
        assert_eq!(first.len(), 1);

        // 租约为0秒，未ack的作业立即重新可见
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let second = store.due_before(now, 10).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, job.id);
    }

    #[tokio::test]
    async fn test_reschedule_same_reminder_upserts() {
        let store = InMemoryJobStore::default();
        let reminder_id = Uuid::new_v4();
        let now = Utc::now();

        store
            .schedule(&ScheduledJob::new(reminder_id, now + Duration::hours(1)))
            .await
            .unwrap();
        store
            .schedule(&ScheduledJob::new(reminder_id, now - Duration::seconds(1)))
            .await
            .unwrap();

        assert_eq!(store.pending_count().await.unwrap(), 1);
        let due = store.due_before(now, 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].reminder_id, reminder_id);
    }

    #[tokio::test]
    async fn test_cancel_removes_job() {
        let store = InMemoryJobStore::default();
        let reminder_id = Uuid::new_v4();
        let job = ScheduledJob::new(reminder_id, Utc::now() - Duration::seconds(1));
        store.schedule(&job).await.unwrap();

        store.cancel(reminder_id).await.unwrap();
        assert_eq!(store.pending_count().await.unwrap(), 0);
        assert!(store.due_before(Utc::now(), 10).await.unwrap().is_empty());
    }
}
