use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng as _;
use tracing::{debug, info, instrument, warn};

use timekeeper_core::models::{
    topics, CancelReason, EventEnvelope, InstanceGeneratedData, Reminder, ReminderCancelledData,
    ReminderFiredData, ReminderScheduledData, TaskInstance,
};
use timekeeper_core::traits::EventBus;
use timekeeper_core::{SchedulerError, SchedulerResult};

const REMINDER_SOURCE: &str = "/scheduler/reminders";
const RECURRING_SOURCE: &str = "/scheduler/recurring";

/// 事件网关
///
/// 发布侧统一包一层有界重试（指数退避+抖动），重试耗尽返回
/// `PublishFailed` 由调用方决定是否致命。`disabled` 模式下只记日志不发布，
/// 供无broker的本地环境使用。
pub struct EventGateway {
    bus: Arc<dyn EventBus>,
    disabled: bool,
    max_retries: u32,
    retry_base: Duration,
}

impl EventGateway {
    pub fn new(bus: Arc<dyn EventBus>, disabled: bool, max_retries: u32, retry_base_ms: u64) -> Self {
        if disabled {
            info!("事件发布已禁用，所有出站事件将被丢弃");
        }
        Self {
            bus,
            disabled,
            max_retries,
            retry_base: Duration::from_millis(retry_base_ms),
        }
    }

    /// 发布事件，失败时指数退避重试
    #[instrument(skip(self, envelope), fields(topic = %topic, event_id = %envelope.id))]
    pub async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> SchedulerResult<()> {
        if self.disabled {
            debug!("发布已禁用，丢弃事件 {} (主题 {})", envelope.id, topic);
            return Ok(());
        }

        let attempts = self.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            match self.bus.publish(topic, envelope).await {
                Ok(()) => {
                    metrics::counter!("events_published_total", "topic" => topic.to_string())
                        .increment(1);
                    return Ok(());
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt + 1 < attempts {
                        let backoff = self.backoff_with_jitter(attempt);
                        warn!(
                            "发布事件失败 (第{}次)，{}ms后重试: {}",
                            attempt + 1,
                            backoff.as_millis(),
                            last_error
                        );
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        metrics::counter!("events_publish_failed_total", "topic" => topic.to_string())
            .increment(1);
        Err(SchedulerError::PublishFailed {
            topic: topic.to_string(),
            attempts,
            message: last_error,
        })
    }

    fn backoff_with_jitter(&self, attempt: u32) -> Duration {
        let base = self.retry_base.saturating_mul(2u32.saturating_pow(attempt));
        let jitter_ms = rand::rng().random_range(0..=self.retry_base.as_millis() as u64);
        base + Duration::from_millis(jitter_ms)
    }

    /// 消费一批上游事件
    pub async fn consume(&self, topic: &str, limit: usize) -> SchedulerResult<Vec<EventEnvelope>> {
        self.bus.consume(topic, limit).await
    }

    pub async fn ack(&self, topic: &str, event_id: &str) -> SchedulerResult<()> {
        self.bus.ack(topic, event_id).await
    }

    pub async fn nack(&self, topic: &str, event_id: &str, requeue: bool) -> SchedulerResult<()> {
        self.bus.nack(topic, event_id, requeue).await
    }

    pub async fn publish_reminder_scheduled(&self, reminder: &Reminder) -> SchedulerResult<()> {
        let data = ReminderScheduledData {
            reminder_id: reminder.id,
            task_id: reminder.task_id,
            user_id: reminder.user_id,
            scheduled_time: reminder.scheduled_at,
            notification_channels: reminder.channels.clone(),
        };
        let envelope = EventEnvelope::new(
            topics::REMINDER_SCHEDULED,
            REMINDER_SOURCE,
            Some(format!("reminder/{}", reminder.id)),
            &data,
        )?;
        self.publish(topics::REMINDER_SCHEDULED, &envelope).await
    }

    pub async fn publish_reminder_fired(
        &self,
        reminder: &Reminder,
        fired_at: chrono::DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let data = ReminderFiredData {
            reminder_id: reminder.id,
            task_id: reminder.task_id,
            user_id: reminder.user_id,
            scheduled_time: reminder.scheduled_at,
            fired_at,
            notification_channels: reminder.channels.clone(),
        };
        let envelope = EventEnvelope::new(
            topics::REMINDER_FIRED,
            REMINDER_SOURCE,
            Some(format!("reminder/{}", reminder.id)),
            &data,
        )?;
        self.publish(topics::REMINDER_FIRED, &envelope).await
    }

    pub async fn publish_reminder_cancelled(
        &self,
        reminder: &Reminder,
        reason: CancelReason,
    ) -> SchedulerResult<()> {
        let data = ReminderCancelledData {
            reminder_id: reminder.id,
            task_id: reminder.task_id,
            user_id: reminder.user_id,
            reason,
            cancelled_at: Utc::now(),
        };
        let envelope = EventEnvelope::new(
            topics::REMINDER_CANCELLED,
            REMINDER_SOURCE,
            Some(format!("reminder/{}", reminder.id)),
            &data,
        )?;
        self.publish(topics::REMINDER_CANCELLED, &envelope).await
    }

    pub async fn publish_instance_generated(
        &self,
        instance: &TaskInstance,
        reminder_time: Option<chrono::DateTime<Utc>>,
        channels: Vec<timekeeper_core::models::NotificationChannel>,
    ) -> SchedulerResult<()> {
        let data = InstanceGeneratedData {
            task_id: instance.id,
            user_id: instance.user_id,
            recurrence_pattern_id: instance.pattern_id,
            instance_date: instance.occurs_at,
            generated_at: instance.created_at,
            reminder_time,
            notification_channels: channels,
        };
        let envelope = EventEnvelope::new(
            topics::INSTANCE_GENERATED,
            RECURRING_SOURCE,
            Some(format!("pattern/{}", instance.pattern_id)),
            &data,
        )?;
        self.publish(topics::INSTANCE_GENERATED, &envelope).await
    }
}
