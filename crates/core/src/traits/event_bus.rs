use async_trait::async_trait;

use crate::errors::SchedulerResult;
use crate::models::EventEnvelope;

/// 事件总线抽象接口
///
/// 投递语义为至少一次：消费后未 `ack` 的事件会被重新投递，
/// 上层处理器必须以自然键（task_id、instance_id）保证幂等。
#[async_trait]
pub trait EventBus: Send + Sync {
    /// 发布事件到指定主题
    async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> SchedulerResult<()>;

    /// 从指定主题消费一批事件
    async fn consume(&self, topic: &str, limit: usize) -> SchedulerResult<Vec<EventEnvelope>>;

    /// 确认事件处理完成
    async fn ack(&self, topic: &str, event_id: &str) -> SchedulerResult<()>;

    /// 拒绝事件并选择是否重新入队
    async fn nack(&self, topic: &str, event_id: &str, requeue: bool) -> SchedulerResult<()>;

    /// 创建主题（幂等）
    async fn create_topic(&self, topic: &str) -> SchedulerResult<()>;
}
