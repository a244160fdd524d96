use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use timekeeper_core::config::GeneratorConfig;
use timekeeper_core::models::{Reminder, RecurrencePattern, ScheduledJob, TaskInstance};
use timekeeper_core::traits::{
    JobStore, PatternRepository, ReminderRepository, TaskInstanceRepository,
};
use timekeeper_core::SchedulerResult;
use timekeeper_infrastructure::EventGateway;

use crate::recurrence;

/// 单轮生成的统计
#[derive(Debug, Default, Clone, Copy)]
pub struct GenerationStats {
    pub patterns_processed: u64,
    pub patterns_failed: u64,
    pub instances_created: u64,
    pub events_failed: u64,
}

/// 重复任务生成器
///
/// 周期批处理：分页扫描待生成的模式，调用展开引擎得到
/// `(水位线, now+lookahead]` 窗口内的发生时刻，逐条幂等落库并推进水位线。
/// 单个模式失败只记日志，不影响其余模式。
pub struct RecurringGenerator {
    patterns: Arc<dyn PatternRepository>,
    instances: Arc<dyn TaskInstanceRepository>,
    reminders: Arc<dyn ReminderRepository>,
    jobs: Arc<dyn JobStore>,
    gateway: Arc<EventGateway>,
    config: GeneratorConfig,
}

impl RecurringGenerator {
    pub fn new(
        patterns: Arc<dyn PatternRepository>,
        instances: Arc<dyn TaskInstanceRepository>,
        reminders: Arc<dyn ReminderRepository>,
        jobs: Arc<dyn JobStore>,
        gateway: Arc<EventGateway>,
        config: GeneratorConfig,
    ) -> Self {
        Self {
            patterns,
            instances,
            reminders,
            jobs,
            gateway,
            config,
        }
    }

    /// 生成主循环，收到关闭信号后退出
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(self.config.run_interval_seconds));
        info!(
            "重复任务生成器已启动: 周期{}秒, 前瞻{}天",
            self.config.run_interval_seconds, self.config.lookahead_days
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let started = Instant::now();
                    let stats = self.run_once(Utc::now()).await;
                    let elapsed = started.elapsed();
                    metrics::histogram!("generation_cycle_duration_seconds")
                        .record(elapsed.as_secs_f64());
                    info!(
                        "生成轮次完成: 处理{}个模式, 失败{}, 新实例{}, 事件失败{}, 耗时{:?}",
                        stats.patterns_processed,
                        stats.patterns_failed,
                        stats.instances_created,
                        stats.events_failed,
                        elapsed
                    );
                }
                _ = shutdown.recv() => {
                    info!("重复任务生成器收到关闭信号");
                    break;
                }
            }
        }
    }

    /// 单轮生成：反复查询首页直到没有可处理的模式
    ///
    /// 处理成功的模式水位线推进后离开查询集合，因此不能按offset翻页，
    /// 否则会跳过尚未处理的行。失败的模式留在集合里，用失败集过滤避免空转。
    pub async fn run_once(&self, now: DateTime<Utc>) -> GenerationStats {
        let horizon = now + Duration::days(self.config.lookahead_days);
        let mut stats = GenerationStats::default();
        let mut failed_ids: HashSet<Uuid> = HashSet::new();

        loop {
            // 查询量加上失败数，失败的行排在前面时不会挡住后面待处理的行
            let limit = self.config.page_size + failed_ids.len() as i64;
            let page = match self.patterns.find_generation_due(horizon, limit).await {
                Ok(page) => page,
                Err(e) => {
                    error!("查询待生成模式失败: {e}");
                    break;
                }
            };
            let pending: Vec<_> = page
                .into_iter()
                .filter(|p| !failed_ids.contains(&p.id))
                .collect();
            if pending.is_empty() {
                break;
            }

            for pattern in &pending {
                match self.process_pattern(pattern, now, horizon).await {
                    Ok(created) => {
                        stats.patterns_processed += 1;
                        stats.instances_created += created.instances;
                        stats.events_failed += created.events_failed;
                    }
                    Err(e) => {
                        // 单个模式失败不阻塞其余模式，本轮内也不再重试
                        stats.patterns_failed += 1;
                        failed_ids.insert(pattern.id);
                        error!("模式 {} 生成失败: {e}", pattern.id);
                    }
                }
            }
        }

        stats
    }

    #[instrument(skip(self, pattern), fields(pattern_id = %pattern.id, frequency = pattern.frequency.as_str()))]
    async fn process_pattern(
        &self,
        pattern: &RecurrencePattern,
        now: DateTime<Utc>,
        horizon: DateTime<Utc>,
    ) -> SchedulerResult<PatternOutcome> {
        if pattern.is_exhausted(now) {
            self.patterns.deactivate(pattern.id).await?;
            info!("模式 {} 已到达终止条件，停用", pattern.id);
            return Ok(PatternOutcome::default());
        }

        let window_start = pattern.generation_cursor();
        let occs = recurrence::occurrences(pattern, window_start, horizon)?;
        debug!(
            "模式 {} 窗口 ({}, {}] 展开 {} 个发生时刻",
            pattern.id,
            window_start,
            horizon,
            occs.len()
        );

        let mut created = Vec::new();
        for occ in occs {
            let instance = TaskInstance::from_pattern(pattern, occ);
            // 唯一约束兜底，重复运行/并发不会产生重复实例
            if self.instances.insert_if_absent(&instance).await? {
                let reminder = self.schedule_reminder(pattern, &instance).await?;
                created.push((instance, reminder));
            }
        }

        // 水位线推进到窗口末端；数据库失败已在上方中止，可安全重试
        self.patterns
            .advance_watermark(pattern.id, horizon, created.len() as u32)
            .await?;

        let instances = created.len() as u64;
        metrics::counter!("instances_generated_total").increment(instances);

        let events_failed = self.publish_generated(&created).await;

        if let Some(max) = pattern.max_occurrences {
            if pattern.generated_count + created.len() as u32 >= max {
                self.patterns.deactivate(pattern.id).await?;
                info!("模式 {} 已生成满{}次, 停用", pattern.id, max);
            }
        }

        Ok(PatternOutcome {
            instances,
            events_failed,
        })
    }

    /// 按模板提前量为实例建立提醒与触发作业
    async fn schedule_reminder(
        &self,
        pattern: &RecurrencePattern,
        instance: &TaskInstance,
    ) -> SchedulerResult<Option<Reminder>> {
        let Some(offset) = pattern.template.reminder_offset_minutes else {
            return Ok(None);
        };
        let scheduled_at = instance.occurs_at - Duration::minutes(offset);

        let reminder = Reminder::new(
            instance.id,
            instance.user_id,
            scheduled_at,
            pattern.template.channels.clone(),
        );
        let reminder = self.reminders.create(&reminder).await?;
        self.jobs
            .schedule(&ScheduledJob::new(reminder.id, reminder.scheduled_at))
            .await?;

        if let Err(e) = self.gateway.publish_reminder_scheduled(&reminder).await {
            warn!("提醒排程事件发布失败: {e}");
        }
        Ok(Some(reminder))
    }

    /// 分批发布instance.generated事件
    ///
    /// 发布失败只计数并记日志，已落库的实例不回滚。
    async fn publish_generated(&self, created: &[(TaskInstance, Option<Reminder>)]) -> u64 {
        let mut failed = 0u64;
        for chunk in created.chunks(self.config.event_batch_size.max(1)) {
            for (instance, reminder) in chunk {
                let reminder_time = reminder.as_ref().map(|r| r.scheduled_at);
                let channels = reminder
                    .as_ref()
                    .map(|r| r.channels.clone())
                    .unwrap_or_default();
                if let Err(e) = self
                    .gateway
                    .publish_instance_generated(instance, reminder_time, channels)
                    .await
                {
                    failed += 1;
                    warn!("实例生成事件发布失败: {} ({e})", instance.instance_id);
                }
            }
            debug!("已发布 {} 条实例生成事件", chunk.len());
        }
        failed
    }
}

#[derive(Debug, Default)]
struct PatternOutcome {
    instances: u64,
    events_failed: u64,
}
