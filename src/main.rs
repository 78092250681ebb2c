// ==========================================
// 车间生产执行调度系统 - 服务主入口
// ==========================================
// 职责: 初始化日志 → 装配 AppState → 启动心跳 → 等待退出信号
// ==========================================

use std::time::Duration;

use shopfloor_exec::app::{get_default_db_path, AppState};
use shopfloor_exec::logging;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志系统
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{}", shopfloor_exec::APP_NAME);
    tracing::info!("系统版本: {}", shopfloor_exec::VERSION);
    tracing::info!("==================================================");

    let db_path = get_default_db_path();
    tracing::info!("使用数据库: {}", db_path);

    let app_state = AppState::new(db_path).map_err(anyhow::Error::msg)?;
    tracing::info!(
        heartbeat_secs = app_state.config.heartbeat_interval_secs,
        subscriber_buffer = app_state.config.subscriber_buffer,
        "AppState初始化成功"
    );

    let shutdown = CancellationToken::new();
    let heartbeat = app_state.bus.spawn_heartbeat(
        Duration::from_secs(app_state.config.heartbeat_interval_secs),
        shutdown.clone(),
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("收到退出信号, 正在停止...");

    shutdown.cancel();
    if let Err(e) = heartbeat.await {
        tracing::warn!(error = %e, "心跳任务异常退出");
    }

    let stats = app_state.bus.stats();
    tracing::info!(
        published = stats.published,
        delivered = stats.delivered,
        dropped_subscribers = stats.dropped_subscribers,
        "服务已退出"
    );
    Ok(())
}
