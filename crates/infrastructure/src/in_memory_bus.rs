use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use timekeeper_core::models::EventEnvelope;
use timekeeper_core::traits::EventBus;
use timekeeper_core::{SchedulerError, SchedulerResult};

#[derive(Default)]
struct TopicState {
    queue: VecDeque<EventEnvelope>,
    // 已投递未确认，按事件ID索引
    unacked: HashMap<String, EventEnvelope>,
}

/// 内存事件总线实现
///
/// 适用于嵌入式单进程部署和测试。语义与RabbitMQ实现一致：
/// 消费后未ack的事件停留在unacked区，`nack(requeue=true)` 重回队首。
pub struct InMemoryEventBus {
    topics: Arc<RwLock<HashMap<String, TopicState>>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 主题当前深度（待消费+未确认），测试与指标用
    pub async fn depth(&self, topic: &str) -> usize {
        let topics = self.topics.read().await;
        topics
            .get(topic)
            .map(|s| s.queue.len() + s.unacked.len())
            .unwrap_or(0)
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> SchedulerResult<()> {
        let mut topics = self.topics.write().await;
        let state = topics.entry(topic.to_string()).or_default();
        state.queue.push_back(envelope.clone());
        debug!("事件已发布: {} -> {}", envelope.id, topic);
        Ok(())
    }

    async fn consume(&self, topic: &str, limit: usize) -> SchedulerResult<Vec<EventEnvelope>> {
        let mut topics = self.topics.write().await;
        let state = topics.entry(topic.to_string()).or_default();

        let n = limit.min(state.queue.len());
        let mut batch = Vec::with_capacity(n);
        for _ in 0..n {
            if let Some(envelope) = state.queue.pop_front() {
                state
                    .unacked
                    .insert(envelope.id.to_string(), envelope.clone());
                batch.push(envelope);
            }
        }

        if !batch.is_empty() {
            debug!("从主题 {} 消费 {} 条事件", topic, batch.len());
        }
        Ok(batch)
    }

    async fn ack(&self, topic: &str, event_id: &str) -> SchedulerResult<()> {
        let mut topics = self.topics.write().await;
        let state = topics.entry(topic.to_string()).or_default();
        if state.unacked.remove(event_id).is_none() {
            warn!("ack未知事件: {} (主题 {})", event_id, topic);
        }
        Ok(())
    }

    async fn nack(&self, topic: &str, event_id: &str, requeue: bool) -> SchedulerResult<()> {
        let mut topics = self.topics.write().await;
        let state = topics
            .get_mut(topic)
            .ok_or_else(|| SchedulerError::MessageQueue(format!("主题不存在: {topic}")))?;

        match state.unacked.remove(event_id) {
            Some(envelope) if requeue => {
                state.queue.push_front(envelope);
                debug!("事件 {} 重新入队 (主题 {})", event_id, topic);
            }
            Some(_) => {
                debug!("事件 {} 已丢弃 (主题 {})", event_id, topic);
            }
            None => {
                warn!("nack未知事件: {} (主题 {})", event_id, topic);
            }
        }
        Ok(())
    }

    async fn create_topic(&self, topic: &str) -> SchedulerResult<()> {
        let mut topics = self.topics.write().await;
        topics.entry(topic.to_string()).or_default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(n: u32) -> EventEnvelope {
        EventEnvelope::new(
            "tasks.task.created",
            "/test",
            None,
            &json!({ "n": n }),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_publish_consume_ack() {
        let bus = InMemoryEventBus::new();
        let e = envelope(1);
        bus.publish("tasks.task.created", &e).await.unwrap();

        let batch = bus.consume("tasks.task.created", 10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, e.id);

        // 未ack时停留在unacked区
        assert_eq!(bus.depth("tasks.task.created").await, 1);
        bus.ack("tasks.task.created", &e.id.to_string())
            .await
            .unwrap();
        assert_eq!(bus.depth("tasks.task.created").await, 0);
    }

    #[tokio::test]
    async fn test_nack_requeue_redelivers() {
        let bus = InMemoryEventBus::new();
        let e = envelope(2);
        bus.publish("tasks.task.deleted", &e).await.unwrap();

        let first = bus.consume("tasks.task.deleted", 1).await.unwrap();
        assert_eq!(first.len(), 1);

        bus.nack("tasks.task.deleted", &e.id.to_string(), true)
            .await
            .unwrap();

        let second = bus.consume("tasks.task.deleted", 1).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, e.id);
    }

    #[tokio::test]
    async fn test_consume_respects_limit_and_order() {
        let bus = InMemoryEventBus::new();
        for n in 0..5 {
            bus.publish("tasks.task.updated", &envelope(n)).await.unwrap();
        }

        let batch = bus.consume("tasks.task.updated", 3).await.unwrap();
        assert_eq!(batch.len(), 3);

        let rest = bus.consume("tasks.task.updated", 10).await.unwrap();
        assert_eq!(rest.len(), 2);
    }

    #[tokio::test]
    async fn test_consume_empty_topic() {
        let bus = InMemoryEventBus::new();
        bus.create_topic("reminders.reminder.fired").await.unwrap();
        let batch = bus.consume("reminders.reminder.fired", 10).await.unwrap();
        assert!(batch.is_empty());
    }
}
