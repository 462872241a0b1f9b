//! 统一错误处理模块
//!
//! 定义基础设施层共享的错误类型，使用 thiserror 提供良好的错误信息。

use thiserror::Error;

/// 基础设施错误类型
#[derive(Debug, Error)]
pub enum SharedError {
    // ==================== 数据库错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    // ==================== 消息队列错误 ====================
    #[error("RabbitMQ 错误: {0}")]
    Amqp(String),

    // ==================== 配置与 IO 错误 ====================
    #[error("配置错误: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    // ==================== 验证错误 ====================
    #[error("参数验证失败: {0}")]
    Validation(String),

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, SharedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SharedError::Amqp("connection reset".to_string());
        assert_eq!(err.to_string(), "RabbitMQ 错误: connection reset");

        let err: SharedError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, SharedError::Database(_)));
        assert!(err.to_string().starts_with("数据库错误: "));
    }
}
