use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::SchedulerResult;
use crate::models::ScheduledJob;

/// 调度作业存储抽象
///
/// 必须持久：`due_before` 返回作业后进程崩溃，未 `ack` 的作业在
/// 租约过期后重新可见（对调度器是至少一次投递）。实现可以是
/// 数据库轮询表，也可以是嵌入式内存堆。
#[async_trait]
pub trait JobStore: Send + Sync {
    /// 登记作业；同一提醒重复登记时更新触发时间（upsert）
    async fn schedule(&self, job: &ScheduledJob) -> SchedulerResult<()>;

    /// 取消某个提醒对应的作业
    async fn cancel(&self, reminder_id: Uuid) -> SchedulerResult<()>;

    /// 领取触发时间不晚于 `t` 的作业，最多 `limit` 条
    ///
    /// 领取会给作业打上租约，租约内不会被其他轮询者重复领取。
    async fn due_before(&self, t: DateTime<Utc>, limit: i64) -> SchedulerResult<Vec<ScheduledJob>>;

    /// 确认作业处理完成，作业从队列移除
    async fn ack(&self, job_id: Uuid) -> SchedulerResult<()>;

    /// 队列中未完成的作业数量
    async fn pending_count(&self) -> SchedulerResult<u64>;
}
