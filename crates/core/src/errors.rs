use thiserror::Error;

/// 调度核心错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("提醒未找到: {id}")]
    ReminderNotFound { id: uuid::Uuid },

    #[error("重复模式未找到: {id}")]
    PatternNotFound { id: uuid::Uuid },

    #[error("无效的重复规则: {message}")]
    InvalidPattern { message: String },

    #[error("无效的时区标识: {tz}")]
    InvalidTimezone { tz: String },

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("非法的状态转换: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("事件发布失败: topic={topic}, 已重试{attempts}次: {message}")]
    PublishFailed {
        topic: String,
        attempts: u32,
        message: String,
    },

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
