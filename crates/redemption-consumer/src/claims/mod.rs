//! 理赔提交
//!
//! 同一组合同 / 优惠券 / 凭据分别提交给两个合作方：
//! - `rest`：JSON 理赔接口，HTTP Basic 认证
//! - `soap`：旧版 ClaimService.asmx 的 InsertClaim
//!
//! 两个提交互不依赖，任何一方失败只返回错误，由调用方记录后继续。

pub mod rest;
pub mod soap;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::error::{ConsumerError, Result};
use crate::models::{ApiCredentials, ContractDetails, CouponDetails};

pub use rest::RestClaimSubmitter;
pub use soap::SoapClaimSubmitter;

/// 合作方日期格式
pub(crate) const PARTNER_DATE_FORMAT: &str = "%m/%d/%Y";

/// 合作方的成功响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimReceipt {
    pub partner: &'static str,
    pub status: u16,
    pub body: String,
}

/// 理赔提交接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClaimSubmitter: Send + Sync {
    /// 合作方标识，用于日志和指标标签
    fn partner(&self) -> &'static str;

    async fn submit(
        &self,
        contract: &ContractDetails,
        coupons: &[CouponDetails],
        credentials: &ApiCredentials,
    ) -> Result<ClaimReceipt>;
}

pub(crate) fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// 发送请求并把非 2xx 状态转换成 `ClaimRejected`
pub(crate) async fn dispatch(
    partner: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<ClaimReceipt> {
    let response = request
        .send()
        .await
        .map_err(|e| ConsumerError::ClaimTransport {
            partner: partner.to_string(),
            reason: e.to_string(),
        })?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ConsumerError::ClaimTransport {
            partner: partner.to_string(),
            reason: format!("读取响应失败: {e}"),
        })?;

    if !status.is_success() {
        warn!(partner, status = status.as_u16(), body = %body, "合作方拒绝理赔");
        return Err(ConsumerError::ClaimRejected {
            partner: partner.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    debug!(partner, status = status.as_u16(), "理赔提交成功");
    Ok(ClaimReceipt {
        partner,
        status: status.as_u16(),
        body,
    })
}
