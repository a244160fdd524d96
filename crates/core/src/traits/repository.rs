//! 领域仓储抽象
//!
//! 定义数据访问的抽象接口，遵循依赖倒置原则

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::SchedulerResult;
use crate::models::{Reminder, ReminderStatus, RecurrencePattern, TaskInstance};

/// 提醒仓储抽象
///
/// 状态转换必须以CAS方式落库（`WHERE status = 'pending'`），
/// 以便取消与触发竞争时只有一方成功。
#[async_trait]
pub trait ReminderRepository: Send + Sync {
    async fn create(&self, reminder: &Reminder) -> SchedulerResult<Reminder>;
    async fn find_by_id(&self, id: Uuid) -> SchedulerResult<Option<Reminder>>;
    /// 按任务查找未触发的提醒，是事件消费的幂等键查询
    async fn find_pending_by_task(&self, task_id: Uuid) -> SchedulerResult<Option<Reminder>>;
    /// 更新待触发提醒的计划时间，返回是否仍处于pending
    async fn reschedule_pending(
        &self,
        id: Uuid,
        scheduled_at: DateTime<Utc>,
    ) -> SchedulerResult<bool>;
    /// 条件转换 pending -> fired，返回是否成功（false表示已被抢先转换）
    async fn transition_to_fired(
        &self,
        id: Uuid,
        fired_at: DateTime<Utc>,
    ) -> SchedulerResult<bool>;
    /// 条件转换 pending -> cancelled
    async fn transition_to_cancelled(&self, id: Uuid) -> SchedulerResult<bool>;
    async fn count_by_status(&self, status: ReminderStatus) -> SchedulerResult<u64>;
}

/// 重复模式仓储抽象
#[async_trait]
pub trait PatternRepository: Send + Sync {
    async fn create(&self, pattern: &RecurrencePattern) -> SchedulerResult<RecurrencePattern>;
    async fn find_by_id(&self, id: Uuid) -> SchedulerResult<Option<RecurrencePattern>>;
    /// 查询需要生成的活跃模式（水位线落后于视界），按创建时间取前limit条。
    /// 处理成功的模式水位线前移后会离开结果集，调用方重复查询即可遍历全部。
    async fn find_generation_due(
        &self,
        horizon: DateTime<Utc>,
        limit: i64,
    ) -> SchedulerResult<Vec<RecurrencePattern>>;
    /// 推进水位线并累加已生成计数；水位线只会前移
    async fn advance_watermark(
        &self,
        id: Uuid,
        watermark: DateTime<Utc>,
        generated: u32,
    ) -> SchedulerResult<()>;
    /// 软停用：终止条件达成后不再生成，保留行用于审计
    async fn deactivate(&self, id: Uuid) -> SchedulerResult<()>;
}

/// 任务实例仓储抽象
#[async_trait]
pub trait TaskInstanceRepository: Send + Sync {
    /// 幂等插入：(pattern_id, occurs_at) 冲突时不生效，返回是否新插入
    async fn insert_if_absent(&self, instance: &TaskInstance) -> SchedulerResult<bool>;
    async fn find_by_pattern(&self, pattern_id: Uuid) -> SchedulerResult<Vec<TaskInstance>>;
}
