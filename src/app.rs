use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::info;

use timekeeper_core::config::{AppConfig, MessageQueueType};
use timekeeper_core::traits::EventBus;
use timekeeper_generator::RecurringGenerator;
use timekeeper_infrastructure::{
    create_pg_pool, EventGateway, InMemoryEventBus, PostgresJobStore, PostgresPatternRepository,
    PostgresReminderRepository, PostgresTaskInstanceRepository, RabbitMqEventBus,
};
use timekeeper_scheduler::{ReminderScheduler, TaskEventListener};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    Scheduler,
    Generator,
    All,
}

/// 应用实例
///
/// 按运行模式装配提醒调度器、任务事件监听器和重复任务生成器，
/// 共享同一个数据库连接池与事件网关。
pub struct Application {
    mode: AppMode,
    scheduler: Arc<ReminderScheduler>,
    listener: Arc<TaskEventListener>,
    generator: Arc<RecurringGenerator>,
}

impl Application {
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        let pool = create_pg_pool(&config.database)
            .await
            .context("创建数据库连接池失败")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("执行数据库迁移失败")?;

        let bus: Arc<dyn EventBus> = match config.message_queue.r#type {
            MessageQueueType::Rabbitmq => Arc::new(
                RabbitMqEventBus::new(&config.message_queue)
                    .await
                    .context("连接RabbitMQ失败")?,
            ),
            MessageQueueType::InMemory => {
                info!("使用内存事件总线（嵌入式模式）");
                Arc::new(InMemoryEventBus::new())
            }
        };
        let gateway = Arc::new(EventGateway::new(
            bus,
            config.message_queue.publish_disabled,
            config.message_queue.publish_max_retries,
            config.message_queue.publish_retry_base_ms,
        ));

        let reminders = Arc::new(PostgresReminderRepository::new(pool.clone()));
        let patterns = Arc::new(PostgresPatternRepository::new(pool.clone()));
        let instances = Arc::new(PostgresTaskInstanceRepository::new(pool.clone()));
        let jobs = Arc::new(PostgresJobStore::new(
            pool.clone(),
            config.scheduler.claim_lease_seconds,
        ));

        let scheduler = Arc::new(ReminderScheduler::new(
            reminders.clone(),
            jobs.clone(),
            gateway.clone(),
            config.scheduler.clone(),
        ));
        let listener = Arc::new(TaskEventListener::new(
            reminders.clone(),
            jobs.clone(),
            gateway.clone(),
            config.scheduler.clone(),
        ));
        let generator = Arc::new(RecurringGenerator::new(
            patterns,
            instances,
            reminders,
            jobs,
            gateway,
            config.generator.clone(),
        ));

        Ok(Self {
            mode,
            scheduler,
            listener,
            generator,
        })
    }

    /// 启动模式对应的后台循环并等待它们退出
    pub async fn run(&self, shutdown: broadcast::Receiver<()>) -> Result<()> {
        let mut handles = Vec::new();

        if matches!(self.mode, AppMode::Scheduler | AppMode::All) {
            let scheduler = self.scheduler.clone();
            let rx = shutdown.resubscribe();
            handles.push(tokio::spawn(async move { scheduler.run(rx).await }));

            let listener = self.listener.clone();
            let rx = shutdown.resubscribe();
            handles.push(tokio::spawn(async move { listener.run(rx).await }));
        }

        if matches!(self.mode, AppMode::Generator | AppMode::All) {
            let generator = self.generator.clone();
            let rx = shutdown.resubscribe();
            handles.push(tokio::spawn(async move { generator.run(rx).await }));
        }

        info!("应用已启动: 模式{:?}, {}个后台循环", self.mode, handles.len());
        for handle in handles {
            handle.await.context("后台循环异常退出")?;
        }
        Ok(())
    }
}
