use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use timekeeper_core::config::ReminderSchedulerConfig;
use timekeeper_core::models::{
    topics, CancelReason, EventEnvelope, Reminder, ScheduledJob, TaskCreatedData, TaskDeletedData,
    TaskUpdatedData,
};
use timekeeper_core::traits::{JobStore, ReminderRepository};
use timekeeper_core::{SchedulerError, SchedulerResult};
use timekeeper_infrastructure::EventGateway;

/// 上游任务事件监听器
///
/// 消费 tasks.task.created/updated/deleted 三个主题，维护提醒行与
/// 触发作业。传输层至少一次投递，所有处理都以task_id为自然幂等键：
/// 同一事件重复投递不会产生重复提醒。
pub struct TaskEventListener {
    reminders: Arc<dyn ReminderRepository>,
    jobs: Arc<dyn JobStore>,
    gateway: Arc<EventGateway>,
    config: ReminderSchedulerConfig,
}

impl TaskEventListener {
    pub fn new(
        reminders: Arc<dyn ReminderRepository>,
        jobs: Arc<dyn JobStore>,
        gateway: Arc<EventGateway>,
        config: ReminderSchedulerConfig,
    ) -> Self {
        Self {
            reminders,
            jobs,
            gateway,
            config,
        }
    }

    /// 消费主循环，收到关闭信号后退出
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
            self.config.poll_interval_seconds,
        ));
        info!("任务事件监听器已启动");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
                _ = shutdown.recv() => {
                    info!("任务事件监听器收到关闭信号");
                    break;
                }
            }
        }
    }

    /// 消费一轮所有上游主题
    pub async fn run_cycle(&self) {
        for topic in topics::CONSUMED {
            if let Err(e) = self.drain_topic(topic).await {
                error!("消费主题 {} 失败: {e}", topic);
            }
        }
    }

    async fn drain_topic(&self, topic: &str) -> SchedulerResult<()> {
        let batch = self
            .gateway
            .consume(topic, self.config.batch_size.max(0) as usize)
            .await?;

        for envelope in batch {
            let event_id = envelope.id.to_string();
            match self.handle(topic, &envelope).await {
                Ok(()) => self.gateway.ack(topic, &event_id).await?,
                Err(SchedulerError::Serialization(msg)) => {
                    // 无法解析的事件重投也不会成功，丢弃
                    error!("事件 {} 格式非法, 丢弃: {msg}", event_id);
                    self.gateway.ack(topic, &event_id).await?;
                }
                Err(e) => {
                    warn!("事件 {} 处理失败, 重新入队: {e}", event_id);
                    self.gateway.nack(topic, &event_id, true).await?;
                }
            }
        }
        Ok(())
    }

    async fn handle(&self, topic: &str, envelope: &EventEnvelope) -> SchedulerResult<()> {
        match topic {
            topics::TASK_CREATED => self.on_task_created(envelope.decode()?).await,
            topics::TASK_UPDATED => self.on_task_updated(envelope.decode()?).await,
            topics::TASK_DELETED => self.on_task_deleted(envelope.decode()?).await,
            other => {
                warn!("收到未订阅主题 {} 的事件, 忽略", other);
                Ok(())
            }
        }
    }

    #[instrument(skip(self, data), fields(task_id = %data.task_id))]
    async fn on_task_created(&self, data: TaskCreatedData) -> SchedulerResult<()> {
        let Some(reminder_time) = data.reminder_time else {
            debug!("任务 {} 未设置提醒时间, 忽略", data.task_id);
            return Ok(());
        };
        self.upsert_reminder(
            data.task_id,
            data.user_id,
            reminder_time,
            data.notification_channels,
        )
        .await
    }

    #[instrument(skip(self, data), fields(task_id = %data.task_id))]
    async fn on_task_updated(&self, data: TaskUpdatedData) -> SchedulerResult<()> {
        if !data.changes.touches_reminder() {
            return Ok(());
        }

        match data.changes.reminder_time {
            // 新的提醒时间：改期或新建
            Some(Some(reminder_time)) => {
                self.upsert_reminder(data.task_id, data.user_id, reminder_time, Vec::new())
                    .await
            }
            // 提醒被移除：只取消
            Some(None) => {
                self.cancel_for_task(data.task_id, CancelReason::ReminderRemoved)
                    .await
            }
            // 只有到期时间变化：旧提醒时间不再可信，取消并等待上游重新给出
            None => {
                self.cancel_for_task(data.task_id, CancelReason::ReminderRemoved)
                    .await
            }
        }
    }

    #[instrument(skip(self, data), fields(task_id = %data.task_id))]
    async fn on_task_deleted(&self, data: TaskDeletedData) -> SchedulerResult<()> {
        self.cancel_for_task(data.task_id, CancelReason::TaskDeleted)
            .await
    }

    /// 按task_id幂等登记提醒：已有pending则改期，否则新建
    async fn upsert_reminder(
        &self,
        task_id: Uuid,
        user_id: Uuid,
        scheduled_at: DateTime<Utc>,
        channels: Vec<timekeeper_core::models::NotificationChannel>,
    ) -> SchedulerResult<()> {
        if let Some(existing) = self.reminders.find_pending_by_task(task_id).await? {
            if self
                .reminders
                .reschedule_pending(existing.id, scheduled_at)
                .await?
            {
                self.jobs
                    .schedule(&ScheduledJob::new(existing.id, scheduled_at))
                    .await?;
                info!("提醒 {} 改期至 {}", existing.id, scheduled_at);
            }
            return Ok(());
        }

        let reminder = self
            .reminders
            .create(&Reminder::new(task_id, user_id, scheduled_at, channels))
            .await?;
        self.jobs
            .schedule(&ScheduledJob::new(reminder.id, scheduled_at))
            .await?;
        metrics::counter!("reminders_scheduled_total").increment(1);
        info!("任务 {} 登记提醒 {} @ {}", task_id, reminder.id, scheduled_at);

        // 状态已落库，排程事件发布失败不回滚
        if let Err(e) = self.gateway.publish_reminder_scheduled(&reminder).await {
            warn!("提醒 {} 的scheduled事件发布失败: {e}", reminder.id);
        }
        Ok(())
    }

    /// 取消任务的pending提醒（如有），CAS保证与触发竞争只有一方生效
    async fn cancel_for_task(&self, task_id: Uuid, reason: CancelReason) -> SchedulerResult<()> {
        let Some(reminder) = self.reminders.find_pending_by_task(task_id).await? else {
            debug!("任务 {} 没有pending提醒可取消", task_id);
            return Ok(());
        };

        if !self.reminders.transition_to_cancelled(reminder.id).await? {
            debug!("提醒 {} 的取消被抢先, 跳过", reminder.id);
            return Ok(());
        }
        self.jobs.cancel(reminder.id).await?;
        metrics::counter!("reminders_cancelled_total").increment(1);
        info!("任务 {} 的提醒 {} 已取消", task_id, reminder.id);

        if let Err(e) = self
            .gateway
            .publish_reminder_cancelled(&reminder, reason)
            .await
        {
            warn!("提醒 {} 的cancelled事件发布失败: {e}", reminder.id);
        }
        Ok(())
    }
}
