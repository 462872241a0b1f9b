//! 导出邮件发送
//!
//! `Mailer` 抽象发送行为，生产环境使用 SMTP 中继（SendGrid），测试中使用 mock。

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use redemption_shared::config::SmtpConfig;
use tracing::info;

use crate::error::{ConsumerError, Result};

/// 一封 HTML 邮件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// SMTP 发送器
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
        }
        .map_err(|e| ConsumerError::Mail(format!("SMTP 中继配置无效: {e}")))?;

        let transport = builder
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();

        let from = config
            .from_address
            .parse::<Mailbox>()
            .map_err(|e| ConsumerError::Mail(format!("发件地址无效 {}: {e}", config.from_address)))?;

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let to = message
            .to
            .parse::<Mailbox>()
            .map_err(|e| ConsumerError::Mail(format!("收件地址无效 {}: {e}", message.to)))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject.clone())
            .header(ContentType::TEXT_HTML)
            .body(message.html_body.clone())
            .map_err(|e| ConsumerError::Mail(e.to_string()))?;

        let response = self
            .transport
            .send(email)
            .await
            .map_err(|e| ConsumerError::Mail(e.to_string()))?;

        info!(to = %message.to, code = %response.code(), "导出邮件已发送");
        Ok(())
    }
}
