use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{SchedulerError, SchedulerResult};
use crate::models::reminder::NotificationChannel;

/// 重复频率
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Custom,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Yearly => "yearly",
            Frequency::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> SchedulerResult<Self> {
        match s {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            "yearly" => Ok(Frequency::Yearly),
            "custom" => Ok(Frequency::Custom),
            other => Err(SchedulerError::InvalidPattern {
                message: format!("不支持的重复频率: {other}"),
            }),
        }
    }
}

/// 每月的生成日
///
/// `Last` 表示"当月最后一天"，会被钳制到实际的月末；
/// 显式的日号在该月不存在时按跳过处理（见生成引擎）。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DayOfMonth {
    Day(u32),
    Last,
}

impl DayOfMonth {
    pub fn parse(s: &str) -> SchedulerResult<Self> {
        if s == "last" {
            return Ok(DayOfMonth::Last);
        }
        let day: u32 = s.parse().map_err(|_| SchedulerError::InvalidPattern {
            message: format!("无效的每月日号: {s}"),
        })?;
        if !(1..=31).contains(&day) {
            return Err(SchedulerError::InvalidPattern {
                message: format!("每月日号必须在1-31之间: {day}"),
            });
        }
        Ok(DayOfMonth::Day(day))
    }

    pub fn to_db_string(&self) -> String {
        match self {
            DayOfMonth::Day(d) => d.to_string(),
            DayOfMonth::Last => "last".to_string(),
        }
    }
}

/// 任务优先级
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// 任务模板
///
/// 每次生成任务实例时套用的内容；`reminder_offset_minutes` 为
/// 相对实例发生时间提前量，缺省表示生成的实例不带提醒。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub priority: Priority,
    #[serde(default)]
    pub reminder_offset_minutes: Option<i64>,
    #[serde(default)]
    pub channels: Vec<NotificationChannel>,
}

/// 重复模式
///
/// 用户定义的重复规则，由RecurringGenerator按水位线逐窗口展开为
/// 具体的任务实例。`last_generated_at` 是单调推进的生成水位线。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurrencePattern {
    pub id: Uuid,
    pub user_id: Uuid,
    pub template: TaskTemplate,
    pub frequency: Frequency,
    pub interval: u32,
    /// 每周模式的生效日，0=周一 .. 6=周日
    pub days_of_week: Vec<u8>,
    pub day_of_month: Option<DayOfMonth>,
    /// custom频率使用的六段CRON表达式
    pub cron_expr: Option<String>,
    pub end_date: Option<DateTime<Utc>>,
    pub max_occurrences: Option<u32>,
    /// 已生成的实例总数，用于max_occurrences终止判断
    pub generated_count: u32,
    pub timezone: String,
    pub active: bool,
    pub last_generated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecurrencePattern {
    /// 创建边界校验
    ///
    /// 非法规则在此拒绝，不会进入生成引擎。
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.template.title.trim().is_empty() {
            return Err(SchedulerError::InvalidPattern {
                message: "任务模板标题不能为空".to_string(),
            });
        }

        if self.interval == 0 || self.interval > 365 {
            return Err(SchedulerError::InvalidPattern {
                message: format!("重复间隔必须在1-365之间: {}", self.interval),
            });
        }

        if self.end_date.is_some() && self.max_occurrences.is_some() {
            return Err(SchedulerError::InvalidPattern {
                message: "end_date和max_occurrences不能同时设置".to_string(),
            });
        }

        if let Some(max) = self.max_occurrences {
            if max == 0 {
                return Err(SchedulerError::InvalidPattern {
                    message: "max_occurrences必须大于0".to_string(),
                });
            }
        }

        match self.frequency {
            Frequency::Weekly => {
                if self.days_of_week.is_empty() {
                    return Err(SchedulerError::InvalidPattern {
                        message: "weekly模式必须指定days_of_week".to_string(),
                    });
                }
                if self.days_of_week.iter().any(|d| *d > 6) {
                    return Err(SchedulerError::InvalidPattern {
                        message: "days_of_week取值必须在0-6之间".to_string(),
                    });
                }
            }
            Frequency::Monthly => {
                if self.day_of_month.is_none() {
                    return Err(SchedulerError::InvalidPattern {
                        message: "monthly模式必须指定day_of_month".to_string(),
                    });
                }
            }
            Frequency::Custom => {
                if self.cron_expr.as_deref().map_or(true, str::is_empty) {
                    return Err(SchedulerError::InvalidPattern {
                        message: "custom模式必须指定cron表达式".to_string(),
                    });
                }
            }
            Frequency::Daily | Frequency::Yearly => {}
        }

        self.parse_timezone()?;

        Ok(())
    }

    /// 解析模式时区
    pub fn parse_timezone(&self) -> SchedulerResult<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| SchedulerError::InvalidTimezone {
                tz: self.timezone.clone(),
            })
    }

    /// 生成起点：水位线与创建时间的较大者
    pub fn generation_cursor(&self) -> DateTime<Utc> {
        match self.last_generated_at {
            Some(watermark) if watermark > self.created_at => watermark,
            _ => self.created_at,
        }
    }

    /// 是否已到达终止条件
    pub fn is_exhausted(&self, now: DateTime<Utc>) -> bool {
        if let Some(end) = self.end_date {
            if end < now {
                return true;
            }
        }
        if let Some(max) = self.max_occurrences {
            if self.generated_count >= max {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_pattern() -> RecurrencePattern {
        RecurrencePattern {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            template: TaskTemplate {
                title: "每日站会".to_string(),
                description: String::new(),
                priority: Priority::Medium,
                reminder_offset_minutes: Some(15),
                channels: vec![NotificationChannel::Email],
            },
            frequency: Frequency::Daily,
            interval: 1,
            days_of_week: vec![],
            day_of_month: None,
            cron_expr: None,
            end_date: None,
            max_occurrences: None,
            generated_count: 0,
            timezone: "Asia/Shanghai".to_string(),
            active: true,
            last_generated_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_validate_interval_bounds() {
        let mut pattern = base_pattern();
        pattern.interval = 0;
        assert!(pattern.validate().is_err());
        pattern.interval = 366;
        assert!(pattern.validate().is_err());
        pattern.interval = 14;
        assert!(pattern.validate().is_ok());
    }

    #[test]
    fn test_validate_end_conditions_exclusive() {
        let mut pattern = base_pattern();
        pattern.end_date = Some(Utc::now());
        pattern.max_occurrences = Some(10);
        assert!(pattern.validate().is_err());

        pattern.max_occurrences = None;
        assert!(pattern.validate().is_ok());
    }

    #[test]
    fn test_validate_weekly_requires_days() {
        let mut pattern = base_pattern();
        pattern.frequency = Frequency::Weekly;
        assert!(pattern.validate().is_err());

        pattern.days_of_week = vec![0, 2];
        assert!(pattern.validate().is_ok());

        pattern.days_of_week = vec![7];
        assert!(pattern.validate().is_err());
    }

    #[test]
    fn test_validate_timezone() {
        let mut pattern = base_pattern();
        pattern.timezone = "Mars/Olympus".to_string();
        assert!(pattern.validate().is_err());
    }

    #[test]
    fn test_day_of_month_parse() {
        assert_eq!(DayOfMonth::parse("last").unwrap(), DayOfMonth::Last);
        assert_eq!(DayOfMonth::parse("15").unwrap(), DayOfMonth::Day(15));
        assert!(DayOfMonth::parse("32").is_err());
        assert!(DayOfMonth::parse("0").is_err());
    }

    #[test]
    fn test_exhausted_by_max_occurrences() {
        let mut pattern = base_pattern();
        pattern.max_occurrences = Some(3);
        pattern.generated_count = 3;
        assert!(pattern.is_exhausted(Utc::now()));

        pattern.generated_count = 2;
        assert!(!pattern.is_exhausted(Utc::now()));
    }
}
