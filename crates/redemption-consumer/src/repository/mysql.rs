//! MySQL 仓储实现
//!
//! 表结构由经销商主系统维护，列名沿用其 PascalCase 命名，
//! 查询里统一用别名转成 snake_case 以便 `FromRow` 映射。

use async_trait::async_trait;
use sqlx::{MySql, MySqlPool, QueryBuilder};
use tracing::debug;

use super::traits::{ExportRepository, RedemptionLookup};
use crate::error::Result;
use crate::models::{ApiCredentials, ContractDetails, CouponDetails, DealerContractRow};

const CONTRACT_SELECT: &str = r#"
    SELECT
        CAST(tbl_contract.ContractID AS SIGNED) AS contract_id,
        CAST(tbl_contract.ContractNo AS CHAR) AS contract_no,
        CAST(tbl_contract.VIN AS CHAR) AS vin,
        DATE_FORMAT(FROM_UNIXTIME(tbl_contract.SaleDate), '%m/%d/%Y') AS sale_date,
        IF(tbl_contract.UnlimitedTerm = 1, 'N/A',
           DATE_FORMAT(FROM_UNIXTIME(tbl_contract.ValidityDate), '%m/%d/%Y')) AS validity_date,
        tbl_customer.CustomerFName AS customer_first_name,
        tbl_customer.CustomerLName AS customer_last_name,
        tbl_customer.PrimaryEmail AS customer_email,
        CAST(tbl_customer.PhoneHome AS CHAR) AS customer_phone,
        CAST(tbl_planmaster.PlanID AS SIGNED) AS plan_id,
        CAST(tbl_planmaster.PlanCode AS CHAR) AS plan_code,
        tbl_planmaster.PlanDescription AS plan_description,
        CAST(tbl_planmaster.ValidityDays AS SIGNED) AS validity_days,
        CAST(tbl_planmaster.ValidityMileage AS SIGNED) AS validity_mileage,
        CAST(tbl_dealer.DealerID AS SIGNED) AS dealer_id,
        tbl_dealer.DealerTitle AS dealer_title,
        tbl_dealer.DealerAddress1 AS dealer_address1,
        tbl_dealer.DealerAddress2 AS dealer_address2,
        tbl_dealer.CityName AS city_name,
        (SELECT StateTitle FROM tbl_states
          WHERE tbl_states.StateID = tbl_dealer.StateID) AS state_name,
        (SELECT country.iso3 FROM country
          WHERE country.id = tbl_dealer.DealerCountry) AS country,
        CAST(tbl_dealer.DealerZIP AS CHAR) AS dealer_zip,
        tbl_dealer.ContPerson AS contact_person,
        CAST(tbl_dealer.ContPersonPhone AS CHAR) AS contact_phone,
        tbl_dealer.ContPersonEmail AS contact_email,
        (SELECT CAST(SUM(tbl_contractcoupon.CouponValue) AS DOUBLE)
           FROM tbl_contractcoupon
          WHERE tbl_contractcoupon.ContractID = tbl_contract.ContractID
            AND tbl_contractcoupon.CouponID IN ("#;

const CONTRACT_FROM: &str = r#")) AS coupon_value
    FROM tbl_contract
    JOIN tbl_customer ON tbl_customer.CustomerID = tbl_contract.CustomerID
    JOIN tbl_planmaster ON tbl_planmaster.PlanID = tbl_contract.PlanID
    JOIN tbl_dealer ON tbl_dealer.DealerID = tbl_contract.DealerID
    WHERE tbl_contract.ContractID = "#;

const COUPON_SELECT: &str = r#"
    SELECT
        COUNT(CouponID) AS total_coupon,
        CouponTitle AS coupon_title,
        CAST(MAX(IF(VariablePrice > 0, VariablePrice, CouponValue)) AS DOUBLE) AS coupon_value,
        CAST(MAX(RepairOrderNo) AS CHAR) AS repair_order_no,
        MAX(DATE_FORMAT(FROM_UNIXTIME(RecievedDate), '%m/%d/%Y')) AS received_date,
        CAST(MAX(CheckNo) AS CHAR) AS check_no,
        CAST(MAX(CouponMileage) AS SIGNED) AS coupon_mileage,
        CAST(MAX(UserID) AS SIGNED) AS user_id,
        CAST(MAX(VariablePrice) AS DOUBLE) AS variable_price,
        CAST(MAX(ServiceAmounts) AS CHAR) AS service_amounts,
        CAST(ServiceType AS CHAR) AS service_type,
        CAST(ServiceID AS SIGNED) AS service_id,
        CAST(MAX(ModifiedDate) AS CHAR) AS modified_date
    FROM tbl_contractcoupon
    WHERE ContractID = "#;

/// 兑换仓储的 MySQL 实现
#[derive(Clone)]
pub struct MySqlRedemptionRepository {
    pool: MySqlPool,
}

impl MySqlRedemptionRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

/// 追加 `IN (...)` 内的绑定参数，空列表写入 NULL 使条件恒不成立
fn push_id_list(builder: &mut QueryBuilder<'_, MySql>, ids: &[i64]) {
    if ids.is_empty() {
        builder.push("NULL");
        return;
    }
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
}

#[async_trait]
impl RedemptionLookup for MySqlRedemptionRepository {
    async fn contract_details(
        &self,
        contract_id: i64,
        coupon_ids: &[i64],
    ) -> Result<Option<ContractDetails>> {
        let mut builder = QueryBuilder::<MySql>::new(CONTRACT_SELECT);
        push_id_list(&mut builder, coupon_ids);
        builder.push(CONTRACT_FROM);
        builder.push_bind(contract_id);
        builder.push(" LIMIT 1");

        let contract = builder
            .build_query_as::<ContractDetails>()
            .fetch_optional(&self.pool)
            .await?;

        debug!(contract_id, found = contract.is_some(), "合同查询完成");
        Ok(contract)
    }

    async fn coupon_details(
        &self,
        contract_id: i64,
        coupon_ids: &[i64],
    ) -> Result<Vec<CouponDetails>> {
        if coupon_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<MySql>::new(COUPON_SELECT);
        builder.push_bind(contract_id);
        builder.push(" AND CouponID IN (");
        push_id_list(&mut builder, coupon_ids);
        builder.push(") GROUP BY CouponTitle, ServiceType, ServiceID");

        let coupons = builder
            .build_query_as::<CouponDetails>()
            .fetch_all(&self.pool)
            .await?;

        debug!(contract_id, groups = coupons.len(), "优惠券查询完成");
        Ok(coupons)
    }

    async fn api_credentials(&self, id: i64) -> Result<Option<ApiCredentials>> {
        let credentials = sqlx::query_as::<_, ApiCredentials>(
            r#"
            SELECT
                Notes AS notes,
                SandBoxUrl AS sandbox_url,
                LiveUrl AS live_url,
                CAST(COALESCE(IsLive, 0) AS SIGNED) AS is_live,
                UserName AS username,
                tbl_api_dealerid.Password AS password,
                SandboxUserName AS sandbox_username,
                SandboxPassword AS sandbox_password,
                CAST(RequestType AS CHAR) AS request_type
            FROM tbl_api_dealerid
            WHERE ID = ?
            LIMIT 1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(credentials)
    }
}

#[async_trait]
impl ExportRepository for MySqlRedemptionRepository {
    async fn dealer_contracts(&self, dealer_id: i64) -> Result<Vec<DealerContractRow>> {
        let rows = sqlx::query_as::<_, DealerContractRow>(
            r#"
            SELECT
                CAST(ContractID AS SIGNED) AS contract_id,
                CAST(DealerID AS SIGNED) AS dealer_id,
                CAST(VIN AS CHAR) AS vin,
                CAST(SaleDate AS SIGNED) AS sale_date
            FROM tbl_contract
            WHERE DealerID = ?
            "#,
        )
        .bind(dealer_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn mark_export_sent(&self, export_id: i64, sent_at: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tbl_emailexport
            SET SendEmail = 1, EmailSentDate = ?
            WHERE ID = ?
            "#,
        )
        .bind(sent_at)
        .bind(export_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
