// ==========================================
// 血液供应匹配引擎 - 主入口
// ==========================================
// 用法:
//   lifebank-matching [--once]
//   --once: 只执行一个调度周期后退出
//   默认:   启动后台调度与预留清理, Ctrl-C 退出
// 数据库: LIFEBANK_DB_PATH 或用户数据目录（可先运行 seed_demo_db）
// ==========================================

use chrono::Utc;
use lifebank_matching::app::{get_default_db_path, AppState};
use lifebank_matching::engine::CycleReport;
use lifebank_matching::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{}", lifebank_matching::APP_NAME);
    tracing::info!("系统版本: {}", lifebank_matching::VERSION);
    tracing::info!("==================================================");

    let once = std::env::args().skip(1).any(|a| a == "--once");

    let db_path = get_default_db_path();
    tracing::info!("使用数据库: {}", db_path);
    let state = AppState::new(db_path)?;

    let summary = state.engine.bootstrap(Utc::now()).await?;
    if summary.banks == 0 {
        tracing::warn!("数据库中没有血库, 可先运行 seed_demo_db 写入演示数据");
    }

    if once {
        let report = state.engine.scheduler().run_cycle(Utc::now()).await?;
        log_report(&report);
        for alert in state.dashboard_api.critical_alerts(Utc::now()).await? {
            tracing::warn!(
                bank = %alert.bank_name,
                blood_type = %alert.blood_type,
                available = alert.available,
                "库存告急"
            );
        }
        return Ok(());
    }

    let tasks = state.engine.start_background();
    tracing::info!("后台调度已启动, Ctrl-C 退出");
    tokio::signal::ctrl_c().await?;

    tracing::info!("收到退出信号, 停止后台任务");
    tasks.shutdown().await?;
    Ok(())
}

fn log_report(report: &CycleReport) {
    tracing::info!(
        expired = report.expired.len(),
        fulfilled = report.fulfilled.len(),
        partial = report.partial.len(),
        deferred = report.deferred.len(),
        stalled = report.stalled.len(),
        failures = report.failures.len(),
        "调度周期完成"
    );
    for plan in &report.plans {
        for segment in &plan.segments {
            tracing::info!(
                request_id = %plan.request_id,
                bank_id = %segment.bank_id,
                blood_type = %segment.blood_type,
                quantity = segment.quantity,
                distance_km = segment.distance_km,
                expires_at = %segment.expires_at,
                "分配"
            );
        }
    }
    for failure in &report.failures {
        tracing::warn!(request_id = %failure.request_id, stage = ?failure.stage, error = %failure.error, "请求处理失败");
    }
}
