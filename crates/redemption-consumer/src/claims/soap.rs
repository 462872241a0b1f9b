//! SOAP 理赔提交
//!
//! 报文字段沿用现有集成的映射，其中几项与字段语义并不对应：
//! `Claim_Complaint` 填的是优惠券金额，`Claim_EstimatedRepairCost`
//! 和 `Claim_Payment_ReferenceNumber` 填的是最大维修单号，
//! `Claim_LossDate` 填的是合同到期日。合作方确认前保持原样。

use async_trait::async_trait;
use chrono::NaiveDate;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use redemption_shared::config::ClaimsConfig;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info, instrument};

use super::{ClaimReceipt, ClaimSubmitter, PARTNER_DATE_FORMAT, dispatch, today};
use crate::error::{ConsumerError, Result};
use crate::models::{ApiCredentials, ContractDetails, CouponDetails};

pub const PARTNER: &str = "soap";

const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const SERVICE_NS: &str = "http://services.ase-profittrack.com/";

/// 报文中的固定值
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapIdentity {
    pub system_id: String,
    pub shop_entity_number: String,
    pub repair_order_number: String,
}

impl From<&ClaimsConfig> for SoapIdentity {
    fn from(config: &ClaimsConfig) -> Self {
        Self {
            system_id: config.soap_system_id.clone(),
            shop_entity_number: config.soap_shop_entity_number.clone(),
            repair_order_number: config.soap_repair_order_number.clone(),
        }
    }
}

fn text<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

struct EnvelopeWriter {
    writer: Writer<Vec<u8>>,
}

impl EnvelopeWriter {
    fn new() -> Self {
        Self {
            writer: Writer::new(Vec::new()),
        }
    }

    fn write(&mut self, event: Event<'_>) -> Result<()> {
        self.writer
            .write_event(event)
            .map_err(|e| ConsumerError::Envelope(e.to_string()))
    }

    fn open(&mut self, name: &str, xmlns: Option<(&str, &str)>) -> Result<()> {
        let mut start = BytesStart::new(name);
        if let Some(attr) = xmlns {
            start.push_attribute(attr);
        }
        self.write(Event::Start(start))
    }

    fn close(&mut self, name: &str) -> Result<()> {
        self.write(Event::End(BytesEnd::new(name)))
    }

    /// 写入 `<name>value</name>`，值会被转义
    fn field(&mut self, name: &str, value: &str) -> Result<()> {
        self.open(name, None)?;
        if !value.is_empty() {
            self.write(Event::Text(BytesText::new(value)))?;
        }
        self.close(name)
    }

    fn finish(self) -> Result<String> {
        String::from_utf8(self.writer.into_inner())
            .map_err(|e| ConsumerError::Envelope(e.to_string()))
    }
}

/// 构建 InsertClaim 报文
pub fn build_envelope(
    identity: &SoapIdentity,
    contract: &ContractDetails,
    coupons: &[CouponDetails],
    credentials: &ApiCredentials,
    today: NaiveDate,
) -> Result<String> {
    let (username, password) = credentials.active_login();
    let max_repair_order = CouponDetails::max_repair_order(coupons).unwrap_or_default();
    let check_no = coupons.first().map(|c| text(&c.check_no)).unwrap_or_default();

    let mut xml = EnvelopeWriter::new();
    xml.write(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    xml.open("soap:Envelope", Some(("xmlns:soap", SOAP_ENV_NS)))?;
    xml.open("soap:Body", None)?;
    xml.open("InsertClaim", Some(("xmlns", SERVICE_NS)))?;
    xml.open("InsertClaimRequest", None)?;

    xml.field("System_ID", &identity.system_id)?;
    xml.field("User_ID", username)?;
    xml.field("User_Password", password)?;
    xml.field("Contract_ContractNumber", &text(&contract.contract_no))?;
    xml.field("Contract_VIN", &text(&contract.vin))?;
    xml.field("Contract_DealerNumber", &contract.dealer_id.to_string())?;
    xml.field("Contract_EffectiveDate", &text(&contract.sale_date))?;
    xml.field("Contract_ProductLineCode", &text(&contract.plan_id))?;
    xml.field("Contract_PlanCode", &text(&contract.plan_id))?;
    xml.field("Contract_Customer_LastName", &text(&contract.customer_last_name))?;
    xml.field("Claim_Number", &text(&contract.contract_no))?;
    xml.field("Claim_LossDate", &text(&contract.validity_date))?;
    xml.field("Claim_RepairOrderNumber", &identity.repair_order_number)?;
    xml.field(
        "Claim_LossOdometer",
        &CouponDetails::max_mileage(coupons).to_string(),
    )?;
    xml.field("Claim_Complaint", &text(&contract.coupon_value))?;
    xml.field("Claim_Cause", "")?;
    xml.field("Claim_CorrectiveAction", "")?;
    xml.field("Claim_EstimatedRepairCost", &max_repair_order)?;
    xml.field("Claim_Payment_ReferenceNumber", &max_repair_order)?;
    xml.field("Claim_Payment_CheckNumber", &check_no)?;
    xml.field(
        "Claim_Payment_CheckPrintDate",
        &today.format(PARTNER_DATE_FORMAT).to_string(),
    )?;
    xml.field("Claim_AllowMultipleClaimsInPast7Days", "false")?;
    xml.field("Claim_ApplyDeductible", "true")?;
    xml.field("Claim_RoadSideSO", "")?;
    xml.field("Shop_EntityNumber", &identity.shop_entity_number)?;

    xml.open("Claim_PartLines", None)?;
    for coupon in coupons {
        let title = text(&coupon.coupon_title);
        xml.open("ClaimImportPartLine", None)?;
        xml.field("Claim_Part_ItemName", &title)?;
        xml.field("Claim_Part_ItemDescription", &title)?;
        xml.field(
            "Claim_Part_RequestedQuantity",
            &coupon.total_coupon.to_string(),
        )?;
        xml.field("Claim_Part_RequestedUnitPrice", &text(&coupon.coupon_value))?;
        xml.field("Claim_Part_AuthorizedQuantity", "0")?;
        xml.field("Claim_Part_AuthorizedUnitPrice", "0")?;
        xml.field("Claim_Part_TaxRate", "0")?;
        xml.field("Claim_Part_TaxAmount", "0")?;
        xml.close("ClaimImportPartLine")?;
    }
    xml.close("Claim_PartLines")?;

    xml.close("InsertClaimRequest")?;
    xml.close("InsertClaim")?;
    xml.close("soap:Body")?;
    xml.close("soap:Envelope")?;
    xml.finish()
}

/// SOAP 理赔提交器
pub struct SoapClaimSubmitter {
    client: reqwest::Client,
    url: String,
    identity: SoapIdentity,
}

impl SoapClaimSubmitter {
    pub fn new(client: reqwest::Client, config: &ClaimsConfig) -> Self {
        Self {
            client,
            url: config.soap_url.clone(),
            identity: SoapIdentity::from(config),
        }
    }
}

#[async_trait]
impl ClaimSubmitter for SoapClaimSubmitter {
    fn partner(&self) -> &'static str {
        PARTNER
    }

    #[instrument(skip_all, fields(partner = PARTNER, contract_id = contract.contract_id))]
    async fn submit(
        &self,
        contract: &ContractDetails,
        coupons: &[CouponDetails],
        credentials: &ApiCredentials,
    ) -> Result<ClaimReceipt> {
        let envelope = build_envelope(&self.identity, contract, coupons, credentials, today())?;
        info!(url = %self.url, part_lines = coupons.len(), "提交 SOAP 理赔");
        debug!(bytes = envelope.len(), "SOAP 报文已生成");

        let request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", self.url.as_str())
            .body(envelope);

        dispatch(PARTNER, request).await
    }
}
