//! 仓储 Trait 定义

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ApiCredentials, ContractDetails, CouponDetails, DealerContractRow};

/// 兑换查询接口
///
/// 三个查询彼此独立，不在同一事务中执行。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RedemptionLookup: Send + Sync {
    /// 按合同 ID 查询合同详情，`coupon_ids` 用于汇总本次兑换的优惠券面值
    async fn contract_details(
        &self,
        contract_id: i64,
        coupon_ids: &[i64],
    ) -> Result<Option<ContractDetails>>;

    /// 查询合同下指定优惠券的聚合明细，`coupon_ids` 为空时直接返回空列表
    async fn coupon_details(&self, contract_id: i64, coupon_ids: &[i64])
    -> Result<Vec<CouponDetails>>;

    async fn api_credentials(&self, id: i64) -> Result<Option<ApiCredentials>>;
}

/// 导出记录接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExportRepository: Send + Sync {
    /// 列出经销商名下全部合同
    async fn dealer_contracts(&self, dealer_id: i64) -> Result<Vec<DealerContractRow>>;

    /// 标记导出邮件已发送，返回受影响行数
    async fn mark_export_sent(&self, export_id: i64, sent_at: &str) -> Result<u64>;
}
