//! 共享库
//!
//! 包含经销商消息处理进程共用的配置、错误处理、数据库连接、RabbitMQ、可观测性等基础设施代码。

pub mod amqp;
pub mod config;
pub mod database;
pub mod error;
pub mod observability;
