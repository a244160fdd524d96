use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use timekeeper_core::config::ReminderSchedulerConfig;
use timekeeper_core::models::{topics, NotificationChannel, Reminder, ReminderStatus, ScheduledJob};
use timekeeper_core::test_utils::MockReminderRepository;
use timekeeper_core::traits::{EventBus, JobStore, ReminderRepository};
use timekeeper_core::SchedulerError;
use timekeeper_infrastructure::{EventGateway, InMemoryEventBus, InMemoryJobStore};
use timekeeper_scheduler::ReminderScheduler;

struct Harness {
    reminders: Arc<MockReminderRepository>,
    jobs: Arc<InMemoryJobStore>,
    bus: Arc<InMemoryEventBus>,
    scheduler: ReminderScheduler,
}

fn harness() -> Harness {
    let reminders = Arc::new(MockReminderRepository::new());
    let jobs = Arc::new(InMemoryJobStore::default());
    let bus = Arc::new(InMemoryEventBus::new());
    let gateway = Arc::new(EventGateway::new(bus.clone(), false, 3, 1));

    let config = ReminderSchedulerConfig {
        enabled: true,
        poll_interval_seconds: 30,
        batch_size: 100,
        misfire_grace_seconds: 60,
        claim_lease_seconds: 300,
    };
    let scheduler = ReminderScheduler::new(reminders.clone(), jobs.clone(), gateway, config);
    Harness {
        reminders,
        jobs,
        bus,
        scheduler,
    }
}

async fn pending_reminder(h: &Harness, scheduled_at: chrono::DateTime<Utc>) -> Reminder {
    let reminder = Reminder::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        scheduled_at,
        vec![NotificationChannel::Email],
    );
    h.reminders.insert(reminder.clone()).await;
    h.jobs
        .schedule(&ScheduledJob::new(reminder.id, scheduled_at))
        .await
        .unwrap();
    reminder
}

#[tokio::test]
async fn due_reminder_fires_and_publishes() {
    let h = harness();
    let now = Utc::now();
    let reminder = pending_reminder(&h, now - Duration::seconds(5)).await;

    let stats = h.scheduler.run_cycle(now).await;
    assert_eq!(stats.fired, 1);
    assert_eq!(stats.failed, 0);

    let stored = h.reminders.get(reminder.id).await.unwrap();
    assert_eq!(stored.status, ReminderStatus::Fired);
    assert!(stored.fired_at.is_some());
    assert_eq!(h.jobs.pending_count().await.unwrap(), 0);

    let fired = h.bus.consume(topics::REMINDER_FIRED, 10).await.unwrap();
    assert_eq!(fired.len(), 1);
}

#[tokio::test]
async fn future_reminder_does_not_fire() {
    let h = harness();
    let now = Utc::now();
    pending_reminder(&h, now + Duration::hours(1)).await;

    let stats = h.scheduler.run_cycle(now).await;
    assert_eq!(stats.fired, 0);
    assert_eq!(h.jobs.pending_count().await.unwrap(), 1);
}

#[tokio::test]
async fn cancelled_reminder_is_skipped_not_fired() {
    let h = harness();
    let now = Utc::now();
    let reminder = pending_reminder(&h, now - Duration::seconds(5)).await;

    // 模拟作业到期后、触发前被取消
    h.reminders
        .transition_to_cancelled(reminder.id)
        .await
        .unwrap();

    let stats = h.scheduler.run_cycle(now).await;
    assert_eq!(stats.fired, 0);
    assert_eq!(stats.skipped, 1);
    // 作业被ack清理，不再重投
    assert_eq!(h.jobs.pending_count().await.unwrap(), 0);
    assert!(h.bus.consume(topics::REMINDER_FIRED, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn misfire_beyond_grace_still_fires_exactly_once() {
    let h = harness();
    let now = Utc::now();
    let reminder = pending_reminder(&h, now - Duration::minutes(10)).await;

    let stats = h.scheduler.run_cycle(now).await;
    assert_eq!(stats.fired, 1);

    // 第二轮不会重复触发
    let stats = h.scheduler.run_cycle(now + Duration::seconds(30)).await;
    assert_eq!(stats.fired, 0);

    let stored = h.reminders.get(reminder.id).await.unwrap();
    assert_eq!(stored.status, ReminderStatus::Fired);
    assert_eq!(h.bus.consume(topics::REMINDER_FIRED, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn orphan_job_is_discarded() {
    let h = harness();
    let now = Utc::now();
    h.jobs
        .schedule(&ScheduledJob::new(Uuid::new_v4(), now - Duration::seconds(1)))
        .await
        .unwrap();

    let stats = h.scheduler.run_cycle(now).await;
    assert_eq!(stats.fired, 0);
    assert_eq!(stats.skipped, 1);
    assert_eq!(h.jobs.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn snooze_pushes_pending_reminder_forward() {
    let h = harness();
    let now = Utc::now();
    let reminder = pending_reminder(&h, now + Duration::minutes(5)).await;

    let snoozed = h.scheduler.snooze(reminder.id, 30).await.unwrap();
    assert_eq!(
        snoozed.scheduled_at,
        reminder.scheduled_at + Duration::minutes(30)
    );

    let stored = h.reminders.get(reminder.id).await.unwrap();
    assert_eq!(stored.scheduled_at, snoozed.scheduled_at);

    // 作业同步改期
    assert!(h
        .jobs
        .due_before(now + Duration::minutes(10), 10)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        h.jobs
            .due_before(now + Duration::minutes(40), 10)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn snooze_rejects_invalid_minutes_and_non_pending() {
    let h = harness();
    let now = Utc::now();
    let reminder = pending_reminder(&h, now).await;

    assert!(matches!(
        h.scheduler.snooze(reminder.id, 0).await,
        Err(SchedulerError::Validation(_))
    ));
    assert!(matches!(
        h.scheduler.snooze(reminder.id, 2000).await,
        Err(SchedulerError::Validation(_))
    ));

    h.reminders
        .transition_to_fired(reminder.id, Utc::now())
        .await
        .unwrap();
    assert!(matches!(
        h.scheduler.snooze(reminder.id, 10).await,
        Err(SchedulerError::InvalidStateTransition { .. })
    ));
}
