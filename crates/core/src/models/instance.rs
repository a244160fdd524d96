use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::pattern::{Priority, RecurrencePattern};

/// 任务实例
///
/// 重复模式展开出的一条具体任务。`instance_id` 由
/// (模式ID, 发生时间) 确定性派生，是防止重复生成的去重键，
/// 存储层以 (pattern_id, occurs_at) 唯一约束兜底。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInstance {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub pattern_id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub occurs_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TaskInstance {
    /// 由模式和发生时间构造实例
    ///
    /// 去重键使用UUIDv5：命名空间为模式ID，名称为发生时间的RFC3339，
    /// 相同输入永远得到相同的instance_id。
    pub fn from_pattern(pattern: &RecurrencePattern, occurs_at: DateTime<Utc>) -> Self {
        let instance_id = Self::instance_id_for(pattern.id, occurs_at);
        Self {
            id: Uuid::new_v4(),
            instance_id,
            pattern_id: pattern.id,
            user_id: pattern.user_id,
            title: pattern.template.title.clone(),
            description: pattern.template.description.clone(),
            priority: pattern.template.priority,
            occurs_at,
            created_at: Utc::now(),
        }
    }

    pub fn instance_id_for(pattern_id: Uuid, occurs_at: DateTime<Utc>) -> Uuid {
        Uuid::new_v5(&pattern_id, occurs_at.to_rfc3339().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_id_deterministic() {
        let pattern_id = Uuid::new_v4();
        let at = Utc::now();
        assert_eq!(
            TaskInstance::instance_id_for(pattern_id, at),
            TaskInstance::instance_id_for(pattern_id, at)
        );
        assert_ne!(
            TaskInstance::instance_id_for(pattern_id, at),
            TaskInstance::instance_id_for(Uuid::new_v4(), at)
        );
    }
}
