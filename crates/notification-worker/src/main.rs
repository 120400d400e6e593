//! 通知工作者服务
//!
//! 启动每日提醒调度、延迟队列轮询，并从标准输入逐行消费触发事件。

use std::sync::Arc;

use kiekje_shared::{config::AppConfig, observability};
use notification_worker::{
    context::NotificationContext,
    deferred::{MemoryDeferredQueue, drain_on_shutdown},
    scheduler::{DeferredFlushWorker, ReminderSchedule},
    sender::LoggingPushTransport,
    store::MemoryDocumentStore,
    trigger::consume_lines,
};
use tokio::io::BufReader;
use tokio::sync::watch;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "notification-worker";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(SERVICE_NAME)?;
    config.validate()?;

    let guard = observability::init(&config.service_name, &config.observability).await?;

    info!(
        environment = %config.environment,
        cron = %config.reminder.cron,
        "Starting notification-worker..."
    );

    let store = match &config.store.snapshot_path {
        Some(path) => MemoryDocumentStore::load_snapshot(path).await?,
        None => {
            warn!("未配置文档快照，使用空存储");
            MemoryDocumentStore::new()
        }
    };

    let ctx = NotificationContext::new(
        config,
        Arc::new(store),
        Arc::new(LoggingPushTransport),
        Arc::new(MemoryDeferredQueue::new()),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reminder_handle = tokio::spawn(ReminderSchedule::new(ctx.clone())?.run(shutdown_rx.clone()));
    let flush_handle = tokio::spawn(DeferredFlushWorker::new(ctx.clone()).run(shutdown_rx.clone()));
    let consumer_handle = tokio::spawn(consume_lines(
        ctx.clone(),
        BufReader::new(tokio::io::stdin()),
        shutdown_rx,
    ));

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    // 先停止所有会写入延迟队列的任务，再做最后一次清空
    consumer_handle.abort();
    for handle in [reminder_handle, flush_handle] {
        if let Err(e) = handle.await {
            error!(error = %e, "后台任务异常退出");
        }
    }
    drain_on_shutdown(ctx.deferred.as_ref(), &ctx.dispatcher).await;

    // 标准输入的阻塞读取无法取消，直接退出进程而不是等待运行时回收

    info!("notification-worker shutdown complete");
    drop(guard);
    std::process::exit(0)
}

/// 监听关闭信号
///
/// K8s 通过 SIGTERM 通知 Pod 停止；本地开发通过 Ctrl+C。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
