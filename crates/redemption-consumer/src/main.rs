//! 服务兑换消费者进程
//!
//! 装配配置、数据库、理赔合作方、邮件与审计组件，启动 RabbitMQ 监听循环，
//! 收到 SIGINT / SIGTERM 后处理完当前消息再退出。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use redemption_consumer::{
    audit::AuditLogger,
    claims::{RestClaimSubmitter, SoapClaimSubmitter},
    consumer::RedemptionConsumer,
    export::{ExportNotifier, SmtpMailer},
    processor::RedemptionProcessor,
    repository::MySqlRedemptionRepository,
    token::ClaimTokenManager,
};
use redemption_shared::{
    amqp::{AmqpConnector, redacted_uri},
    config::{AppConfig, ClaimsConfig},
    database::Database,
    observability,
};
use tokio::sync::watch;
use tracing::{error, info};

const SERVICE_NAME: &str = "redemption-consumer";

fn build_http_client(config: &ClaimsConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(secs) = config.request_timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    Ok(builder.build()?)
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置，配置文件缺失或解析失败时退回默认值 + 旧环境变量
    let config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {e}");
        let mut config = AppConfig {
            service_name: SERVICE_NAME.to_string(),
            ..Default::default()
        };
        config.apply_legacy_env(|key| std::env::var(key).ok());
        config
    });

    // 2. 可观测性
    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    config.validate()?;
    info!(
        environment = %config.environment,
        broker = %redacted_uri(&config.rabbitmq),
        queue = %config.rabbitmq.queue,
        "Starting redemption-consumer..."
    );

    // 3. 数据库
    let db = Database::connect(&config.database).await?;
    let repository = Arc::new(MySqlRedemptionRepository::new(db.pool().clone()));

    // 4. 理赔合作方、邮件、审计
    let http = build_http_client(&config.claims)?;
    let rest = Arc::new(RestClaimSubmitter::new(
        http.clone(),
        config.claims.rest_base_url.clone(),
    ));
    let soap = Arc::new(SoapClaimSubmitter::new(http, &config.claims));
    let mailer = Arc::new(SmtpMailer::new(&config.smtp)?);
    let export = ExportNotifier::new(repository.clone(), mailer, config.export.clone());
    let audit = AuditLogger::open(&config.audit).await?;
    let tokens = ClaimTokenManager::new(&config.token)?;

    let processor = Arc::new(RedemptionProcessor::new(
        tokens, repository, rest, soap, export, audit,
    ));

    // 5. 监听循环
    let consumer = RedemptionConsumer::new(
        AmqpConnector::new(config.rabbitmq.clone()),
        processor,
        Duration::from_secs(config.rabbitmq.reconnect_delay_secs),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    consumer.run(shutdown_rx).await;

    db.close().await;
    info!("redemption-consumer stopped");
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
