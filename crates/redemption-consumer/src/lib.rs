//! 服务兑换消费者
//!
//! 从 RabbitMQ 逐条消费经销商的服务兑换请求：校验签名令牌，查询合同、优惠券和凭据，
//! 向两个理赔合作方提交理赔，邮件发送经销商导出文件，最后写审计记录。
//! 每条消息无论处理结果如何都会被确认。

pub mod audit;
pub mod claims;
pub mod consumer;
pub mod error;
pub mod export;
pub mod models;
pub mod processor;
pub mod proxy;
pub mod repository;
pub mod token;
