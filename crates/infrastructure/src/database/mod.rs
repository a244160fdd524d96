pub mod postgres;

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use timekeeper_core::config::DatabaseConfig;
use timekeeper_core::{SchedulerError, SchedulerResult};

/// 创建PostgreSQL连接池
pub async fn create_pg_pool(config: &DatabaseConfig) -> SchedulerResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
        .connect(&config.url)
        .await
        .map_err(|e| SchedulerError::DatabaseOperation(format!("连接数据库失败: {e}")))?;

    info!(
        "数据库连接池已建立: max={}, min={}",
        config.max_connections, config.min_connections
    );
    Ok(pool)
}
