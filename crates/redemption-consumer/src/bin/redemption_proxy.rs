//! HTTP 发布代理进程
//!
//! 为无法直连 RabbitMQ 的生产方提供表单接口，收到 SIGINT / SIGTERM 后
//! 处理完在途请求再退出。

use std::sync::Arc;

use anyhow::{Context, Result};
use redemption_consumer::proxy::{AmqpGateway, ProxyState, proxy_routes};
use redemption_shared::{amqp::redacted_uri, config::AppConfig, observability};
use tokio::net::TcpListener;
use tracing::{error, info};

const SERVICE_NAME: &str = "redemption-proxy";

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load(SERVICE_NAME)?;

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    config.proxy.validate()?;

    let gateway = Arc::new(AmqpGateway::new(config.rabbitmq.clone()));
    let state = Arc::new(ProxyState::new(gateway, config.proxy.secret.clone()));
    let app = proxy_routes().with_state(state);

    let listener = TcpListener::bind(&config.proxy.listen_addr)
        .await
        .with_context(|| format!("绑定 {} 失败", config.proxy.listen_addr))?;

    info!(
        addr = %config.proxy.listen_addr,
        broker = %redacted_uri(&config.rabbitmq),
        "redemption-proxy 已启动"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("代理服务运行失败")?;

    info!("redemption-proxy stopped");
    Ok(())
}

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
