//! Timekeeper核心类型
//!
//! 领域模型、错误类型、仓储与消息抽象以及配置模型。
//! 本crate不依赖任何具体的存储或传输实现。

pub mod config;
pub mod errors;
pub mod models;
pub mod test_utils;
pub mod traits;

pub use errors::{SchedulerError, SchedulerResult};
