//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。
//! 未安装 recorder 时记录函数为空操作，测试中可以直接调用。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_metrics();
    metrics::counter!("service_starts_total", "service" => config.service_name.clone())
        .increment(1);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
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

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册指标描述，出现在 /metrics 端点的 HELP 注释中
pub fn describe_metrics() {
    metrics::describe_counter!(
        "redemption_messages_total",
        "Redemption messages handled, labelled by outcome"
    );
    metrics::describe_counter!(
        "claim_submissions_total",
        "Claim submissions to partner endpoints"
    );
    metrics::describe_counter!("export_emails_total", "Export notification emails");
    metrics::describe_counter!(
        "amqp_connect_attempts_total",
        "Broker connection attempts"
    );
}

/// 记录一条消息的处理结果
#[inline]
pub fn record_message_outcome(outcome: &str) {
    metrics::counter!("redemption_messages_total", "outcome" => outcome.to_string()).increment(1);
}

/// 记录一次理赔提交
#[inline]
pub fn record_claim_submission(partner: &str, success: bool) {
    let status = if success { "success" } else { "failed" };
    metrics::counter!(
        "claim_submissions_total",
        "partner" => partner.to_string(),
        "status" => status
    )
    .increment(1);
}

/// 记录一次导出邮件
#[inline]
pub fn record_export_email(status: &str) {
    metrics::counter!("export_emails_total", "status" => status.to_string()).increment(1);
}

/// 记录一次 broker 连接尝试
#[inline]
pub fn record_connect_attempt(success: bool) {
    let status = if success { "success" } else { "failed" };
    metrics::counter!("amqp_connect_attempts_total", "status" => status).increment(1);
}
