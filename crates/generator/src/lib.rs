//! 重复任务生成：规则展开引擎与水位线批处理生成器

pub mod generator;
pub mod recurrence;

pub use generator::{GenerationStats, RecurringGenerator};
