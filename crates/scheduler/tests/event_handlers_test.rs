use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use timekeeper_core::config::ReminderSchedulerConfig;
use timekeeper_core::models::{
    topics, CancelReason, EventEnvelope, NotificationChannel, ReminderCancelledData,
    ReminderStatus, TaskChanges, TaskCreatedData, TaskDeletedData, TaskUpdatedData,
};
use timekeeper_core::test_utils::MockReminderRepository;
use timekeeper_core::traits::{EventBus, JobStore, ReminderRepository};
use timekeeper_infrastructure::{EventGateway, InMemoryEventBus, InMemoryJobStore};
use timekeeper_scheduler::TaskEventListener;

struct Harness {
    reminders: Arc<MockReminderRepository>,
    jobs: Arc<InMemoryJobStore>,
    bus: Arc<InMemoryEventBus>,
    listener: TaskEventListener,
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
    let listener = TaskEventListener::new(reminders.clone(), jobs.clone(), gateway, config);
    Harness {
        reminders,
        jobs,
        bus,
        listener,
    }
}

fn created_event(task_id: Uuid, user_id: Uuid, reminder_time: Option<chrono::DateTime<Utc>>) -> EventEnvelope {
    let data = TaskCreatedData {
        task_id,
        user_id,
        due_date: reminder_time.map(|t| t + Duration::hours(1)),
        reminder_time,
        notification_channels: vec![NotificationChannel::Email],
        is_recurring: false,
    };
    EventEnvelope::new(
        topics::TASK_CREATED,
        "/api/tasks",
        Some(format!("task/{task_id}")),
        &data,
    )
    .unwrap()
}

#[tokio::test]
async fn task_created_schedules_exactly_one_reminder() {
    let h = harness();
    let task_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    let reminder_time = Utc::now() + Duration::hours(1);

    h.bus
        .publish(topics::TASK_CREATED, &created_event(task_id, user_id, Some(reminder_time)))
        .await
        .unwrap();
    h.listener.run_cycle().await;

    let reminder = h
        .reminders
        .find_pending_by_task(task_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reminder.scheduled_at, reminder_time);
    assert_eq!(h.jobs.pending_count().await.unwrap(), 1);

    let scheduled = h.bus.consume(topics::REMINDER_SCHEDULED, 10).await.unwrap();
    assert_eq!(scheduled.len(), 1);
}

#[tokio::test]
async fn duplicate_delivery_is_idempotent() {
    let h = harness();
    let task_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    let reminder_time = Utc::now() + Duration::hours(1);
    let event = created_event(task_id, user_id, Some(reminder_time));

    // 至少一次投递：同一事件送达两次
    h.bus.publish(topics::TASK_CREATED, &event).await.unwrap();
    h.listener.run_cycle().await;
    h.bus.publish(topics::TASK_CREATED, &event).await.unwrap();
    h.listener.run_cycle().await;

    assert_eq!(
        h.reminders
            .count_by_status(ReminderStatus::Pending)
            .await
            .unwrap(),
        1
    );
    assert_eq!(h.jobs.pending_count().await.unwrap(), 1);
}

#[tokio::test]
async fn task_without_reminder_time_is_ignored() {
    let h = harness();
    let task_id = Uuid::new_v4();

    h.bus
        .publish(topics::TASK_CREATED, &created_event(task_id, Uuid::new_v4(), None))
        .await
        .unwrap();
    h.listener.run_cycle().await;

    assert!(h
        .reminders
        .find_pending_by_task(task_id)
        .await
        .unwrap()
        .is_none());
    assert_eq!(h.jobs.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn task_deleted_cancels_pending_reminder() {
    let h = harness();
    let task_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    let reminder_time = Utc::now() + Duration::hours(1);

    h.bus
        .publish(topics::TASK_CREATED, &created_event(task_id, user_id, Some(reminder_time)))
        .await
        .unwrap();
    h.listener.run_cycle().await;

    let deleted = EventEnvelope::new(
        topics::TASK_DELETED,
        "/api/tasks",
        Some(format!("task/{task_id}")),
        &TaskDeletedData { task_id, user_id },
    )
    .unwrap();
    h.bus.publish(topics::TASK_DELETED, &deleted).await.unwrap();
    h.listener.run_cycle().await;

    // 恰好一条scheduled、一条cancelled、零条fired
    assert_eq!(h.bus.consume(topics::REMINDER_SCHEDULED, 10).await.unwrap().len(), 1);
    let cancelled = h.bus.consume(topics::REMINDER_CANCELLED, 10).await.unwrap();
    assert_eq!(cancelled.len(), 1);
    let data: ReminderCancelledData = cancelled[0].decode().unwrap();
    assert_eq!(data.reason, CancelReason::TaskDeleted);
    assert!(h.bus.consume(topics::REMINDER_FIRED, 10).await.unwrap().is_empty());

    assert_eq!(h.jobs.pending_count().await.unwrap(), 0);
    assert_eq!(
        h.reminders
            .count_by_status(ReminderStatus::Cancelled)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn task_updated_reschedules_pending_reminder() {
    let h = harness();
    let task_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    let original = Utc::now() + Duration::hours(1);
    let moved = original + Duration::hours(2);

    h.bus
        .publish(topics::TASK_CREATED, &created_event(task_id, user_id, Some(original)))
        .await
        .unwrap();
    h.listener.run_cycle().await;

    let updated = EventEnvelope::new(
        topics::TASK_UPDATED,
        "/api/tasks",
        Some(format!("task/{task_id}")),
        &TaskUpdatedData {
            task_id,
            user_id,
            changes: TaskChanges {
                reminder_time: Some(Some(moved)),
                due_date: None,
            },
        },
    )
    .unwrap();
    h.bus.publish(topics::TASK_UPDATED, &updated).await.unwrap();
    h.listener.run_cycle().await;

    let reminder = h
        .reminders
        .find_pending_by_task(task_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reminder.scheduled_at, moved);
    // 改期而非新建
    assert_eq!(
        h.reminders
            .count_by_status(ReminderStatus::Pending)
            .await
            .unwrap(),
        1
    );
    assert_eq!(h.jobs.pending_count().await.unwrap(), 1);
}

#[tokio::test]
async fn reminder_removal_cancels_with_reason() {
    let h = harness();
    let task_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();

    h.bus
        .publish(
            topics::TASK_CREATED,
            &created_event(task_id, user_id, Some(Utc::now() + Duration::hours(1))),
        )
        .await
        .unwrap();
    h.listener.run_cycle().await;

    let updated = EventEnvelope::new(
        topics::TASK_UPDATED,
        "/api/tasks",
        None,
        &TaskUpdatedData {
            task_id,
            user_id,
            changes: TaskChanges {
                reminder_time: Some(None),
                due_date: None,
            },
        },
    )
    .unwrap();
    h.bus.publish(topics::TASK_UPDATED, &updated).await.unwrap();
    h.listener.run_cycle().await;

    let cancelled = h.bus.consume(topics::REMINDER_CANCELLED, 10).await.unwrap();
    assert_eq!(cancelled.len(), 1);
    let data: ReminderCancelledData = cancelled[0].decode().unwrap();
    assert_eq!(data.reason, CancelReason::ReminderRemoved);
}

#[tokio::test]
async fn malformed_event_is_dropped_not_requeued() {
    let h = harness();

    let bogus = EventEnvelope::new(
        topics::TASK_CREATED,
        "/api/tasks",
        None,
        &json!({ "task_id": 123, "user_id": "不是uuid" }),
    )
    .unwrap();
    h.bus.publish(topics::TASK_CREATED, &bogus).await.unwrap();

    h.listener.run_cycle().await;
    // 格式非法的事件被丢弃，不会停留在队列里反复重投
    assert_eq!(h.bus.depth(topics::TASK_CREATED).await, 0);
}
