//! 兑换令牌处理
//!
//! 上游把合同 ID、优惠券 ID 列表和记录 ID 签进一个 HMAC JWT，
//! 消费端校验签名与过期时间后取出载荷。校验失败的各种原因
//! （格式错误、签名不符、已过期）只写日志，对调用方统一表现为拒绝。

use std::collections::HashSet;
use std::str::FromStr;

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use redemption_shared::config::TokenConfig;
use redemption_shared::error::SharedError;
use tracing::{debug, warn};

use crate::error::ConsumerError;
use crate::models::DecodedClaim;

/// 令牌管理器
#[derive(Clone)]
pub struct ClaimTokenManager {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    leeway_secs: u64,
}

impl ClaimTokenManager {
    /// 创建令牌管理器
    ///
    /// 只接受基于共享密钥的 HS 系列算法。
    pub fn new(config: &TokenConfig) -> Result<Self, ConsumerError> {
        let algorithm = Algorithm::from_str(&config.algorithm).map_err(|_| {
            SharedError::Validation(format!("不支持的签名算法: {}", config.algorithm))
        })?;
        if !matches!(
            algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(SharedError::Validation(format!(
                "签名算法必须是 HS256/HS384/HS512，当前为 {}",
                config.algorithm
            ))
            .into());
        }

        Ok(Self {
            algorithm,
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            leeway_secs: config.leeway_secs,
        })
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.algorithm);
        // 现有生产者签发的令牌不带 exp，带了才校验
        validation.required_spec_claims = HashSet::new();
        validation.validate_exp = true;
        validation.leeway = self.leeway_secs;
        validation
    }

    /// 校验并解析令牌，任何失败都返回 `None`
    pub fn verify(&self, token: &str) -> Option<DecodedClaim> {
        let token = token.trim();
        if token.is_empty() {
            warn!("令牌为空");
            return None;
        }

        match decode::<DecodedClaim>(token, &self.decoding_key, &self.validation()) {
            Ok(data) => {
                debug!(
                    contract_id = data.claims.contract_id,
                    coupon_ids = ?data.claims.coupon_ids,
                    record_id = data.claims.record_id,
                    "令牌校验通过"
                );
                Some(data.claims)
            }
            Err(e) => {
                match e.kind() {
                    ErrorKind::ExpiredSignature => warn!("令牌已过期"),
                    ErrorKind::InvalidSignature => warn!("令牌签名无效"),
                    _ => warn!(error = %e, "令牌校验失败"),
                }
                None
            }
        }
    }

    /// 签发令牌，`expires_in_secs` 为空表示不设过期时间
    pub fn sign(
        &self,
        claim: &DecodedClaim,
        expires_in_secs: Option<i64>,
    ) -> Result<String, ConsumerError> {
        let mut claim = claim.clone();
        claim.exp = expires_in_secs.map(|secs| Utc::now().timestamp() + secs);

        encode(&Header::new(self.algorithm), &claim, &self.encoding_key)
            .map_err(|e| SharedError::Internal(format!("令牌签发失败: {e}")).into())
    }
}
