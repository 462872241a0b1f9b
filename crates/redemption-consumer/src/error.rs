//! 兑换消费者错误类型
//!
//! 在共享库 SharedError 基础上定义本服务特有的错误变体。
//! 所有错误都在单条消息的处理边界内被记录，消息本身照常确认。

use redemption_shared::error::SharedError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsumerError {
    /// 消息体不是合法的兑换请求 JSON
    #[error("消息格式无效: {0}")]
    InvalidMessage(String),

    /// 令牌签名、过期或格式校验未通过，具体原因只写日志
    #[error("令牌校验失败")]
    TokenRejected,

    #[error("查询结果为空: {entity} id={id}")]
    LookupMissing { entity: String, id: String },

    /// 合作方返回非 2xx 状态
    #[error("理赔被拒绝: 合作方={partner}, 状态码={status}, 响应={body}")]
    ClaimRejected {
        partner: String,
        status: u16,
        body: String,
    },

    /// 请求未能送达合作方（DNS、TLS、连接中断等）
    #[error("理赔请求发送失败: 合作方={partner}, 原因={reason}")]
    ClaimTransport { partner: String, reason: String },

    #[error("SOAP 报文构建失败: {0}")]
    Envelope(String),

    #[error("导出文件生成失败: {0}")]
    Export(String),

    #[error("邮件发送失败: {0}")]
    Mail(String),

    #[error("审计日志写入失败: {0}")]
    Audit(String),

    #[error(transparent)]
    Shared(#[from] SharedError),
}

pub type Result<T> = std::result::Result<T, ConsumerError>;

impl From<sqlx::Error> for ConsumerError {
    fn from(err: sqlx::Error) -> Self {
        Self::Shared(SharedError::Database(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConsumerError::ClaimRejected {
            partner: "rest".to_string(),
            status: 422,
            body: "odometer required".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "理赔被拒绝: 合作方=rest, 状态码=422, 响应=odometer required"
        );

        let err = ConsumerError::LookupMissing {
            entity: "contract".to_string(),
            id: "42".to_string(),
        };
        assert_eq!(err.to_string(), "查询结果为空: contract id=42");

        assert_eq!(ConsumerError::TokenRejected.to_string(), "令牌校验失败");
    }

    #[test]
    fn test_shared_error_passthrough() {
        let err: ConsumerError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, ConsumerError::Shared(SharedError::Database(_))));
    }
}
