//! HTTP 发布代理
//!
//! 供无法直连 RabbitMQ 的生产方使用：以表单 POST 提交 `secret_key`、`action`
//! 以及发布参数，代理校验共享密钥后把消息原样投递到指定交换机。
//!
//! - `GET /`：存活状态
//! - `POST /` `action=test_connection`：验证能否连上 broker
//! - `POST /` `action=publish_message`：发布一条持久化消息，返回队列积压数

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Form, Json, Router,
    extract::State,
    http::StatusCode,
    routing::get,
};
use chrono::Local;
use redemption_shared::amqp::{AmqpPublisher, check_connection};
use redemption_shared::config::RabbitMqConfig;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::Result;

/// 代理背后的 broker 操作
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    async fn test_connection(&self) -> Result<()>;

    /// 发布并等待确认，返回绑定队列的积压数（读取失败时为 `None`）
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> Result<Option<u32>>;
}

/// 基于 [`AmqpPublisher`] 的实现，每个请求单独建连
pub struct AmqpGateway {
    config: RabbitMqConfig,
}

impl AmqpGateway {
    pub fn new(config: RabbitMqConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrokerGateway for AmqpGateway {
    async fn test_connection(&self) -> Result<()> {
        check_connection(&self.config).await?;
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> Result<Option<u32>> {
        // 兑换队列绑定到调用方指定的交换机和路由键
        let config = RabbitMqConfig {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            ..self.config.clone()
        };

        let publisher = AmqpPublisher::connect(&config).await?;
        if let Err(e) = publisher.publish_bytes(body).await {
            publisher.close().await;
            return Err(e.into());
        }

        let depth = match publisher.queue_depth().await {
            Ok(depth) => Some(depth),
            Err(e) => {
                warn!(error = %e, "读取队列积压数失败");
                None
            }
        };
        publisher.close().await;
        Ok(depth)
    }
}

pub struct ProxyState {
    gateway: Arc<dyn BrokerGateway>,
    secret: String,
}

impl ProxyState {
    pub fn new(gateway: Arc<dyn BrokerGateway>, secret: impl Into<String>) -> Self {
        Self {
            gateway,
            secret: secret.into(),
        }
    }
}

/// POST 表单字段
#[derive(Debug, Deserialize)]
pub struct ProxyForm {
    #[serde(default)]
    pub secret_key: String,
    pub action: Option<String>,
    pub exchange: Option<String>,
    pub routing_key: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProxyResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_count: Option<u32>,
    pub timestamp: String,
}

impl ProxyResponse {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
            message_id: None,
            queue_count: None,
            timestamp: now(),
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
            message_id: None,
            queue_count: None,
            timestamp: now(),
        }
    }
}

type Reply = (StatusCode, Json<ProxyResponse>);

fn now() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn reject(status: StatusCode, error: impl Into<String>) -> Reply {
    (status, Json(ProxyResponse::failed(error)))
}

/// 负载中的 `message_id` 字段，取不到时为 `unknown`
fn message_id_of(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message_id").and_then(|id| id.as_str().map(str::to_string)))
        .unwrap_or_else(|| "unknown".to_string())
}

fn required(field: Option<String>) -> Option<String> {
    field.filter(|v| !v.trim().is_empty())
}

pub fn proxy_routes() -> Router<Arc<ProxyState>> {
    Router::new().route("/", get(status).post(dispatch))
}

async fn status() -> Json<ProxyResponse> {
    Json(ProxyResponse::ok("RabbitMQ HTTP Proxy is running"))
}

async fn dispatch(State(state): State<Arc<ProxyState>>, Form(form): Form<ProxyForm>) -> Reply {
    if form.secret_key != state.secret {
        warn!("发布代理收到无效密钥");
        return reject(StatusCode::UNAUTHORIZED, "Invalid secret key");
    }

    match form.action.as_deref() {
        Some("test_connection") => match state.gateway.test_connection().await {
            Ok(()) => (
                StatusCode::OK,
                Json(ProxyResponse::ok("RabbitMQ connection successful")),
            ),
            Err(e) => {
                error!(error = %e, "broker 连接测试失败");
                reject(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        },
        Some("publish_message") => publish(&state, form).await,
        _ => reject(StatusCode::BAD_REQUEST, "Invalid action"),
    }
}

async fn publish(state: &ProxyState, form: ProxyForm) -> Reply {
    let (Some(exchange), Some(routing_key), Some(message)) = (
        required(form.exchange),
        required(form.routing_key),
        required(form.message),
    ) else {
        return reject(
            StatusCode::BAD_REQUEST,
            "Missing required parameters: exchange, routing_key, message",
        );
    };

    let message_id = message_id_of(&message);
    match state
        .gateway
        .publish(&exchange, &routing_key, message.as_bytes())
        .await
    {
        Ok(queue_count) => {
            info!(%exchange, %routing_key, %message_id, ?queue_count, "代理消息已发布");
            let mut reply = ProxyResponse::ok("Message published successfully");
            reply.message_id = Some(message_id);
            reply.queue_count = queue_count;
            (StatusCode::OK, Json(reply))
        }
        Err(e) => {
            error!(%exchange, %routing_key, error = %e, "代理消息发布失败");
            reject(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
