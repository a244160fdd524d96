use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use timekeeper_core::config::ReminderSchedulerConfig;
use timekeeper_core::models::{ScheduledJob, Reminder};
use timekeeper_core::traits::{JobStore, ReminderRepository};
use timekeeper_core::{SchedulerError, SchedulerResult};
use timekeeper_infrastructure::EventGateway;

/// 单轮触发循环的统计
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleStats {
    pub fired: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// 提醒触发调度器
///
/// 轮询JobStore领取到期作业并逐条触发。触发前重新读取提醒并确认
/// 仍处于pending（取消竞争守卫），先以CAS落库fired状态再发布事件：
/// 发布失败只记错误日志，不回滚也不自动重发（尽力通知语义）。
pub struct ReminderScheduler {
    reminders: Arc<dyn ReminderRepository>,
    jobs: Arc<dyn JobStore>,
    gateway: Arc<EventGateway>,
    config: ReminderSchedulerConfig,
}

impl ReminderScheduler {
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

    /// 触发主循环，收到关闭信号后退出
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
            self.config.poll_interval_seconds,
        ));
        info!(
            "提醒调度器已启动: 轮询{}秒, 批量{}",
            self.config.poll_interval_seconds, self.config.batch_size
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let started = Instant::now();
                    let stats = self.run_cycle(Utc::now()).await;
                    if stats.fired + stats.skipped + stats.failed > 0 {
                        info!(
                            "触发轮次完成: 触发{}, 跳过{}, 失败{}, 耗时{:?}",
                            stats.fired, stats.skipped, stats.failed, started.elapsed()
                        );
                    }
                }
                _ = shutdown.recv() => {
                    info!("提醒调度器收到关闭信号");
                    break;
                }
            }
        }
    }

    /// 单轮触发：领取到期作业并逐条处理，单条失败不中断本轮
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> CycleStats {
        let mut stats = CycleStats::default();

        let due = match self.jobs.due_before(now, self.config.batch_size).await {
            Ok(due) => due,
            Err(e) => {
                error!("领取到期作业失败: {e}");
                stats.failed += 1;
                return stats;
            }
        };

        for job in due {
            match self.fire_job(&job, now).await {
                Ok(true) => stats.fired += 1,
                Ok(false) => stats.skipped += 1,
                Err(e) => {
                    // 不ack，租约过期后重投
                    stats.failed += 1;
                    error!("作业 {} (提醒 {}) 触发失败: {e}", job.id, job.reminder_id);
                }
            }
        }
        stats
    }

    /// 触发单个作业，返回是否实际触发
    #[instrument(skip(self, job), fields(job_id = %job.id, reminder_id = %job.reminder_id))]
    async fn fire_job(&self, job: &ScheduledJob, now: DateTime<Utc>) -> SchedulerResult<bool> {
        let lateness = job.lateness(now);
        if job.is_misfire(now, Duration::seconds(self.config.misfire_grace_seconds)) {
            // 超期仍然触发，延迟只做观测
            warn!(
                "作业 {} 超过宽限期 {}秒, 延迟{}秒, 仍将触发",
                job.id,
                self.config.misfire_grace_seconds,
                lateness.num_seconds()
            );
        }
        metrics::histogram!("reminder_fire_lateness_seconds")
            .record(lateness.num_seconds().max(0) as f64);

        let Some(reminder) = self.reminders.find_by_id(job.reminder_id).await? else {
            warn!("作业 {} 对应的提醒不存在，丢弃", job.id);
            self.jobs.ack(job.id).await?;
            return Ok(false);
        };

        // 取消竞争守卫：领取后被取消的提醒不再触发
        if !reminder.is_pending() {
            debug!("提醒 {} 已不处于pending, 跳过", reminder.id);
            self.jobs.ack(job.id).await?;
            return Ok(false);
        }

        let fired_at = Utc::now();
        if !self.reminders.transition_to_fired(reminder.id, fired_at).await? {
            // CAS失败说明取消抢先落库
            debug!("提醒 {} 的fired转换被抢先, 跳过", reminder.id);
            self.jobs.ack(job.id).await?;
            return Ok(false);
        }

        metrics::counter!("reminders_fired_total").increment(1);

        // 状态已持久化，发布失败不重试（下游可按fired行对账）
        if let Err(e) = self.gateway.publish_reminder_fired(&reminder, fired_at).await {
            error!("提醒 {} 的fired事件发布失败: {e}", reminder.id);
        }

        self.jobs.ack(job.id).await?;
        Ok(true)
    }

    /// 推迟待触发的提醒
    ///
    /// 仅pending状态可推迟，分钟数限定1..=1440。
    pub async fn snooze(&self, reminder_id: Uuid, minutes: i64) -> SchedulerResult<Reminder> {
        if !(1..=1440).contains(&minutes) {
            return Err(SchedulerError::Validation(format!(
                "推迟分钟数必须在1-1440之间: {minutes}"
            )));
        }

        let reminder = self
            .reminders
            .find_by_id(reminder_id)
            .await?
            .ok_or(SchedulerError::ReminderNotFound { id: reminder_id })?;

        let new_time = reminder.scheduled_at + Duration::minutes(minutes);
        if !self.reminders.reschedule_pending(reminder_id, new_time).await? {
            return Err(SchedulerError::InvalidStateTransition {
                from: reminder.status.as_str().to_string(),
                to: "pending".to_string(),
            });
        }
        self.jobs
            .schedule(&ScheduledJob::new(reminder_id, new_time))
            .await?;

        info!("提醒 {} 推迟{}分钟至 {}", reminder_id, minutes, new_time);
        let mut snoozed = reminder;
        snoozed.scheduled_at = new_time;
        Ok(snoozed)
    }
}
