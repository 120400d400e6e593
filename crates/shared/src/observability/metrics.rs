//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl Drop for MetricsHandle {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(service_name: &str, config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 注册通用指标描述
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "notifications_sent_total",
        "Total number of push deliveries by kind and status"
    );
    metrics::describe_counter!("reminder_scans_total", "Total number of reminder scans");
    metrics::describe_counter!(
        "trigger_events_total",
        "Total number of trigger events handled"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录一次推送结果
#[inline]
pub fn record_notification(kind: &str, success: bool) {
    let status = if success { "sent" } else { "failed" };
    metrics::counter!(
        "notifications_sent_total",
        "kind" => kind.to_string(),
        "status" => status
    )
    .increment(1);
}

/// 记录一次提醒扫描
#[inline]
pub fn record_reminder_scan(candidates: usize) {
    metrics::counter!("reminder_scans_total").increment(1);
    metrics::histogram!("reminder_scan_candidates").record(candidates as f64);
}

/// 记录一次触发事件
#[inline]
pub fn record_trigger(trigger: &'static str) {
    metrics::counter!("trigger_events_total", "trigger" => trigger).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_without_recorder_is_noop() {
        // 未安装 recorder 时记录指标不应 panic
        record_notification("like", true);
        record_notification("comment", false);
        record_reminder_scan(3);
        record_trigger("daily_reminder");
    }
}
