//! 测试消息发送工具
//!
//! 签发一个兑换令牌并投递到兑换队列，用于联调消费者。

use anyhow::{Context, Result};
use clap::Parser;
use redemption_consumer::{
    models::{DEFAULT_RECORD_ID, DecodedClaim, RedemptionRequest},
    token::ClaimTokenManager,
};
use redemption_shared::{amqp::AmqpPublisher, config::AppConfig};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "send-test-redemption")]
#[command(version, about = "向兑换队列发送一条测试消息")]
struct Cli {
    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// 合同 ID，签发令牌时必填
    #[arg(long, required_unless_present = "token", conflicts_with = "token")]
    contract_id: Option<i64>,

    /// 优惠券 ID，可重复指定，签发令牌时必填
    #[arg(
        long = "coupon-id",
        required_unless_present = "token",
        conflicts_with = "token"
    )]
    coupon_ids: Vec<i64>,

    /// API 凭据 / 导出记录 ID
    #[arg(long, default_value_t = DEFAULT_RECORD_ID, conflicts_with = "token")]
    id: i64,

    /// 令牌有效期（秒），不指定则不带 exp
    #[arg(long, conflicts_with = "token")]
    expires_in_secs: Option<i64>,

    /// 直接发送给定令牌，不再签发
    #[arg(long)]
    token: Option<String>,

    /// 消息中的 request_type
    #[arg(long, default_value = "service_redemption")]
    request_type: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .init();

    let config = AppConfig::load("send-test-redemption")?;

    let token = match cli.token {
        Some(token) => token,
        None => {
            config.validate()?;
            let contract_id = cli.contract_id.context("缺少 --contract-id")?;
            let claim = DecodedClaim {
                contract_id,
                coupon_ids: cli.coupon_ids,
                record_id: cli.id,
                exp: None,
            };
            ClaimTokenManager::new(&config.token)?.sign(&claim, cli.expires_in_secs)?
        }
    };

    let publisher = AmqpPublisher::connect(&config.rabbitmq).await?;
    publisher
        .publish_json(&RedemptionRequest::new(cli.request_type, token))
        .await?;

    match publisher.queue_depth().await {
        Ok(depth) => info!(queue = %config.rabbitmq.queue, depth, "测试消息已发送"),
        Err(e) => info!(error = %e, "测试消息已发送，读取队列深度失败"),
    }

    publisher.close().await;
    Ok(())
}
