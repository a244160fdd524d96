use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use lapin::{
    options::*, types::FieldTable, BasicProperties, Channel, Connection, ConnectionProperties,
    Queue,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use timekeeper_core::config::MessageQueueConfig;
use timekeeper_core::models::{topics, EventEnvelope};
use timekeeper_core::traits::EventBus;
use timekeeper_core::{SchedulerError, SchedulerResult};

/// RabbitMQ事件总线实现
///
/// 每个主题对应一个持久化队列。消费用 `basic_get` 拉取，
/// 投递标签按事件ID登记，ack/nack时换回标签提交给broker。
pub struct RabbitMqEventBus {
    connection: Connection,
    channel: Arc<Mutex<Channel>>,
    // 事件ID -> 投递标签，消费后未确认的事件
    delivery_tags: Mutex<HashMap<String, u64>>,
}

impl RabbitMqEventBus {
    /// 连接RabbitMQ并声明全部主题队列
    pub async fn new(config: &MessageQueueConfig) -> SchedulerResult<Self> {
        let connection = Connection::connect(&config.url, ConnectionProperties::default())
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("连接RabbitMQ失败: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("创建通道失败: {e}")))?;

        info!("成功连接到RabbitMQ: {}", config.url);

        let bus = Self {
            connection,
            channel: Arc::new(Mutex::new(channel)),
            delivery_tags: Mutex::new(HashMap::new()),
        };

        bus.initialize_topics().await?;
        Ok(bus)
    }

    /// 声明所有消费与发布的主题队列
    async fn initialize_topics(&self) -> SchedulerResult<()> {
        let channel = self.channel.lock().await;

        for topic in topics::CONSUMED {
            Self::declare_queue(&channel, topic).await?;
        }
        for topic in [
            topics::REMINDER_SCHEDULED,
            topics::REMINDER_FIRED,
            topics::REMINDER_CANCELLED,
            topics::INSTANCE_GENERATED,
        ] {
            Self::declare_queue(&channel, topic).await?;
        }

        info!("所有主题队列初始化完成");
        Ok(())
    }

    async fn declare_queue(channel: &Channel, topic: &str) -> SchedulerResult<Queue> {
        let queue = channel
            .queue_declare(
                topic,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("声明队列 {topic} 失败: {e}")))?;

        debug!("队列 {} 声明成功", topic);
        Ok(queue)
    }

    fn serialize(envelope: &EventEnvelope) -> SchedulerResult<Vec<u8>> {
        serde_json::to_vec(envelope)
            .map_err(|e| SchedulerError::Serialization(format!("序列化事件信封失败: {e}")))
    }

    fn deserialize(data: &[u8]) -> SchedulerResult<EventEnvelope> {
        serde_json::from_slice(data)
            .map_err(|e| SchedulerError::Serialization(format!("反序列化事件信封失败: {e}")))
    }

    async fn take_delivery_tag(&self, event_id: &str) -> SchedulerResult<u64> {
        let mut tags = self.delivery_tags.lock().await;
        tags.remove(event_id).ok_or_else(|| {
            SchedulerError::MessageQueue(format!("事件 {event_id} 没有待确认的投递记录"))
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    pub async fn close(&self) -> SchedulerResult<()> {
        self.connection
            .close(200, "正常关闭")
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("关闭连接失败: {e}")))?;

        info!("RabbitMQ连接已关闭");
        Ok(())
    }
}

#[async_trait]
impl EventBus for RabbitMqEventBus {
    async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> SchedulerResult<()> {
        let payload = Self::serialize(envelope)?;
        let channel = self.channel.lock().await;

        let confirm = channel
            .basic_publish(
                "",
                topic,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_delivery_mode(2) // 2 = persistent
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("发布事件到 {topic} 失败: {e}")))?;

        confirm
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("事件发布确认失败: {e}")))?;

        debug!("事件 {} 已发布到 {}", envelope.id, topic);
        Ok(())
    }

    async fn consume(&self, topic: &str, limit: usize) -> SchedulerResult<Vec<EventEnvelope>> {
        let channel = self.channel.lock().await;
        let mut batch = Vec::new();

        for _ in 0..limit {
            match channel.basic_get(topic, BasicGetOptions::default()).await {
                Ok(Some(delivery)) => {
                    let envelope = Self::deserialize(&delivery.data)?;
                    self.delivery_tags
                        .lock()
                        .await
                        .insert(envelope.id.to_string(), delivery.delivery_tag);
                    batch.push(envelope);
                }
                Ok(None) => break,
                Err(e) => {
                    // 队列不存在时按空队列处理，避免消费循环被打断
                    let msg = e.to_string();
                    if msg.contains("NOT_FOUND") || msg.contains("404") {
                        warn!("队列 {} 不存在，按空队列处理", topic);
                        break;
                    }
                    return Err(SchedulerError::MessageQueue(format!(
                        "从 {topic} 消费失败: {e}"
                    )));
                }
            }
        }

        if !batch.is_empty() {
            debug!("从主题 {} 消费 {} 条事件", topic, batch.len());
        }
        Ok(batch)
    }

    async fn ack(&self, _topic: &str, event_id: &str) -> SchedulerResult<()> {
        let tag = self.take_delivery_tag(event_id).await?;
        let channel = self.channel.lock().await;
        channel
            .basic_ack(tag, BasicAckOptions::default())
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("确认事件失败: {e}")))?;
        Ok(())
    }

    async fn nack(&self, _topic: &str, event_id: &str, requeue: bool) -> SchedulerResult<()> {
        let tag = self.take_delivery_tag(event_id).await?;
        let channel = self.channel.lock().await;
        channel
            .basic_nack(
                tag,
                BasicNackOptions {
                    requeue,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("拒绝事件失败: {e}")))?;
        Ok(())
    }

    async fn create_topic(&self, topic: &str) -> SchedulerResult<()> {
        let channel = self.channel.lock().await;
        Self::declare_queue(&channel, topic).await?;
        Ok(())
    }
}
