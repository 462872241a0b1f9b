//! 单条兑换消息的处理流程
//!
//! 解析请求 → 校验令牌 → 三项查询 → REST 理赔 → 导出邮件 → SOAP 理赔 → 审计。
//! 令牌无效时直接丢弃；任一查询为空时跳过所有外部调用但仍写审计；
//! 外部调用失败只记日志，不影响后续步骤。

use std::sync::Arc;

use redemption_shared::observability::metrics::record_claim_submission;
use tracing::{debug, error, info, instrument, warn};

use crate::audit::AuditLogger;
use crate::claims::{ClaimReceipt, ClaimSubmitter};
use crate::error::{ConsumerError, Result};
use crate::export::{ExportNotifier, ExportOutcome};
use crate::models::{
    ApiCredentials, ContractDetails, CouponDetails, DecodedClaim, RedemptionRequest,
};
use crate::repository::RedemptionLookup;
use crate::token::ClaimTokenManager;

/// 三个外部步骤各自的结果，失败为 `None`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedemptionReport {
    pub contract_id: i64,
    pub rest: Option<ClaimReceipt>,
    pub export: Option<ExportOutcome>,
    pub soap: Option<ClaimReceipt>,
}

/// 消息处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// 请求或令牌无效，消息被丢弃
    Rejected { reason: String },
    /// 查询结果不全，未发起任何外部调用
    Skipped {
        contract_id: i64,
        missing: Vec<&'static str>,
    },
    Redeemed(RedemptionReport),
}

impl ProcessOutcome {
    /// 指标标签
    pub fn label(&self) -> &'static str {
        match self {
            Self::Rejected { .. } => "rejected",
            Self::Skipped { .. } => "skipped",
            Self::Redeemed(_) => "redeemed",
        }
    }
}

struct LookupResult {
    contract: Option<ContractDetails>,
    coupons: Vec<CouponDetails>,
    credentials: Option<ApiCredentials>,
}

impl LookupResult {
    fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.contract.is_none() {
            missing.push("contract");
        }
        if self.coupons.is_empty() {
            missing.push("coupons");
        }
        if self.credentials.is_none() {
            missing.push("credentials");
        }
        missing
    }
}

pub struct RedemptionProcessor {
    tokens: ClaimTokenManager,
    lookup: Arc<dyn RedemptionLookup>,
    rest: Arc<dyn ClaimSubmitter>,
    soap: Arc<dyn ClaimSubmitter>,
    export: ExportNotifier,
    audit: AuditLogger,
}

impl RedemptionProcessor {
    pub fn new(
        tokens: ClaimTokenManager,
        lookup: Arc<dyn RedemptionLookup>,
        rest: Arc<dyn ClaimSubmitter>,
        soap: Arc<dyn ClaimSubmitter>,
        export: ExportNotifier,
        audit: AuditLogger,
    ) -> Self {
        Self {
            tokens,
            lookup,
            rest,
            soap,
            export,
            audit,
        }
    }

    /// 处理一条原始消息
    ///
    /// 返回 `Err` 仅限数据库或审计文件等基础设施错误；
    /// 业务上的拒绝与跳过都以 `Ok` 返回。
    pub async fn process(&self, payload: &[u8]) -> Result<ProcessOutcome> {
        let request: RedemptionRequest = match serde_json::from_slice(payload) {
            Ok(request) => request,
            Err(e) => {
                let err = ConsumerError::InvalidMessage(e.to_string());
                warn!(error = %err, "丢弃无法解析的消息");
                return Ok(ProcessOutcome::Rejected {
                    reason: err.to_string(),
                });
            }
        };

        let Some(token) = request.token.as_deref().filter(|t| !t.trim().is_empty()) else {
            warn!(request_type = ?request.request_type, "消息缺少令牌字段 apikey");
            return Ok(ProcessOutcome::Rejected {
                reason: "缺少令牌".to_string(),
            });
        };

        let Some(claim) = self.tokens.verify(token) else {
            warn!(request_type = ?request.request_type, "令牌校验失败，丢弃消息");
            return Ok(ProcessOutcome::Rejected {
                reason: ConsumerError::TokenRejected.to_string(),
            });
        };

        let outcome = self.redeem(&claim).await?;

        let entry = self
            .audit
            .record(request.request_type_or_default(), &claim)
            .await?;
        debug!(seq = entry.seq, "审计记录已写入");

        Ok(outcome)
    }

    #[instrument(skip_all, fields(contract_id = claim.contract_id, record_id = claim.record_id))]
    async fn redeem(&self, claim: &DecodedClaim) -> Result<ProcessOutcome> {
        let found = self.lookup_all(claim).await?;
        let missing = found.missing();

        let (Some(contract), Some(credentials), false) = (
            &found.contract,
            &found.credentials,
            found.coupons.is_empty(),
        ) else {
            info!(?missing, "查询结果不全，跳过外部调用");
            return Ok(ProcessOutcome::Skipped {
                contract_id: claim.contract_id,
                missing,
            });
        };
        let coupons = &found.coupons;

        let rest = self.submit(&*self.rest, contract, coupons, credentials).await;

        let export = match self.export.export_to_email(contract, claim.record_id).await {
            Ok(outcome) => {
                info!(outcome = outcome.label(), "导出处理完成");
                Some(outcome)
            }
            Err(e) => {
                error!(error = %e, "导出处理失败");
                None
            }
        };

        let soap = self.submit(&*self.soap, contract, coupons, credentials).await;

        Ok(ProcessOutcome::Redeemed(RedemptionReport {
            contract_id: claim.contract_id,
            rest,
            export,
            soap,
        }))
    }

    /// 三项查询顺序执行，互不依赖
    async fn lookup_all(&self, claim: &DecodedClaim) -> Result<LookupResult> {
        let contract = self
            .lookup
            .contract_details(claim.contract_id, &claim.coupon_ids)
            .await?;
        let coupons = self
            .lookup
            .coupon_details(claim.contract_id, &claim.coupon_ids)
            .await?;
        let credentials = self.lookup.api_credentials(claim.record_id).await?;

        Ok(LookupResult {
            contract,
            coupons,
            credentials,
        })
    }

    async fn submit(
        &self,
        submitter: &dyn ClaimSubmitter,
        contract: &ContractDetails,
        coupons: &[CouponDetails],
        credentials: &ApiCredentials,
    ) -> Option<ClaimReceipt> {
        let partner = submitter.partner();
        match submitter.submit(contract, coupons, credentials).await {
            Ok(receipt) => {
                record_claim_submission(partner, true);
                info!(partner, status = receipt.status, "理赔已提交");
                Some(receipt)
            }
            Err(e) => {
                record_claim_submission(partner, false);
                error!(partner, error = %e, "理赔提交失败");
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::claims::MockClaimSubmitter;
    use crate::export::mailer::MockMailer;
    use crate::models::DealerContractRow;
    use crate::repository::{MockExportRepository, MockRedemptionLookup};
    use mockall::Sequence;
    use redemption_shared::config::{AuditConfig, ExportConfig, TokenConfig};
    use std::path::Path;

    pub(crate) const SECRET: &str = "processor-test-secret";

    pub(crate) fn tokens() -> ClaimTokenManager {
        ClaimTokenManager::new(&TokenConfig {
            secret: SECRET.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    pub(crate) fn signed_payload(claim: &DecodedClaim, expires_in_secs: Option<i64>) -> Vec<u8> {
        let token = tokens().sign(claim, expires_in_secs).unwrap();
        serde_json::to_vec(&RedemptionRequest::new("service_redemption", token)).unwrap()
    }

    pub(crate) fn sample_claim() -> DecodedClaim {
        DecodedClaim {
            contract_id: 42,
            coupon_ids: vec![1, 2],
            record_id: 3,
            exp: None,
        }
    }

    pub(crate) fn audit_config(dir: &Path) -> AuditConfig {
        AuditConfig {
            processed_file: dir.join("processed.jsonl").to_string_lossy().into_owned(),
            transaction_log: dir.join("transactions.log").to_string_lossy().into_owned(),
        }
    }

    pub(crate) fn audit_lines(dir: &Path) -> usize {
        std::fs::read_to_string(dir.join("processed.jsonl"))
            .map(|content| content.lines().count())
            .unwrap_or(0)
    }

    fn partner_mock(partner: &'static str) -> MockClaimSubmitter {
        let mut mock = MockClaimSubmitter::new();
        mock.expect_partner().return_const(partner);
        mock
    }

    /// 所有下游调用都不允许发生的处理器
    pub(crate) async fn untouched_processor(dir: &Path) -> RedemptionProcessor {
        let mut lookup = MockRedemptionLookup::new();
        lookup.expect_contract_details().times(0);
        lookup.expect_coupon_details().times(0);
        lookup.expect_api_credentials().times(0);

        let mut rest = partner_mock("rest");
        rest.expect_submit().times(0);
        let mut soap = partner_mock("soap");
        soap.expect_submit().times(0);

        let mut export_repo = MockExportRepository::new();
        export_repo.expect_dealer_contracts().times(0);
        export_repo.expect_mark_export_sent().times(0);
        let mut mailer = MockMailer::new();
        mailer.expect_send().times(0);

        build(dir, lookup, rest, soap, export_repo, mailer).await
    }

    async fn build(
        dir: &Path,
        lookup: MockRedemptionLookup,
        rest: MockClaimSubmitter,
        soap: MockClaimSubmitter,
        export_repo: MockExportRepository,
        mailer: MockMailer,
    ) -> RedemptionProcessor {
        let export = ExportNotifier::new(
            Arc::new(export_repo),
            Arc::new(mailer),
            ExportConfig {
                directory: dir.join("exports").to_string_lossy().into_owned(),
                ..Default::default()
            },
        );
        RedemptionProcessor::new(
            tokens(),
            Arc::new(lookup),
            Arc::new(rest),
            Arc::new(soap),
            export,
            AuditLogger::open(&audit_config(dir)).await.unwrap(),
        )
    }

    fn fixture_contract() -> ContractDetails {
        ContractDetails {
            contract_id: 42,
            contract_no: Some("C-100".to_string()),
            dealer_id: 2975,
            contact_email: Some("service@dealer.example".to_string()),
            coupon_value: Some(65.5),
            ..Default::default()
        }
    }

    fn fixture_coupons() -> Vec<CouponDetails> {
        vec![
            CouponDetails {
                total_coupon: 1,
                coupon_title: Some("Oil Change".to_string()),
                coupon_mileage: Some(15000),
                ..Default::default()
            },
            CouponDetails {
                total_coupon: 1,
                coupon_title: Some("Tire Rotation".to_string()),
                coupon_mileage: Some(15200),
                ..Default::default()
            },
        ]
    }

    fn receipt(partner: &'static str) -> ClaimReceipt {
        ClaimReceipt {
            partner,
            status: 200,
            body: "ok".to_string(),
        }
    }

    fn full_lookup() -> MockRedemptionLookup {
        let mut lookup = MockRedemptionLookup::new();
        lookup
            .expect_contract_details()
            .withf(|contract_id, coupon_ids| *contract_id == 42 && coupon_ids == [1, 2])
            .times(1)
            .returning(|_, _| Ok(Some(fixture_contract())));
        lookup
            .expect_coupon_details()
            .times(1)
            .returning(|_, _| Ok(fixture_coupons()));
        lookup
            .expect_api_credentials()
            .withf(|id| *id == 3)
            .times(1)
            .returning(|_| Ok(Some(ApiCredentials::default())));
        lookup
    }

    #[tokio::test]
    async fn test_invalid_tokens_make_no_downstream_calls() {
        let dir = tempfile::tempdir().unwrap();
        let processor = untouched_processor(dir.path()).await;

        let expired = signed_payload(&sample_claim(), Some(-3600));
        let forged = {
            let other = ClaimTokenManager::new(&TokenConfig {
                secret: "someone-else".to_string(),
                ..Default::default()
            })
            .unwrap();
            let token = other.sign(&sample_claim(), None).unwrap();
            serde_json::to_vec(&RedemptionRequest::new("service_redemption", token)).unwrap()
        };
        let payloads: Vec<Vec<u8>> = vec![
            b"not json".to_vec(),
            br#"{"request_type":"service_redemption"}"#.to_vec(),
            br#"{"request_type":"service_redemption","apikey":""}"#.to_vec(),
            br#"{"request_type":"service_redemption","apikey":"a.b.c"}"#.to_vec(),
            expired,
            forged,
        ];

        for payload in payloads {
            let outcome = processor.process(&payload).await.unwrap();
            assert_eq!(outcome.label(), "rejected");
        }
        assert_eq!(audit_lines(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_missing_contract_skips_external_calls() {
        let dir = tempfile::tempdir().unwrap();

        let mut lookup = MockRedemptionLookup::new();
        lookup
            .expect_contract_details()
            .returning(|_, _| Ok(None));
        lookup
            .expect_coupon_details()
            .returning(|_, _| Ok(fixture_coupons()));
        lookup
            .expect_api_credentials()
            .returning(|_| Ok(Some(ApiCredentials::default())));

        let mut rest = partner_mock("rest");
        rest.expect_submit().times(0);
        let mut soap = partner_mock("soap");
        soap.expect_submit().times(0);
        let mut export_repo = MockExportRepository::new();
        export_repo.expect_dealer_contracts().times(0);
        export_repo.expect_mark_export_sent().times(0);
        let mut mailer = MockMailer::new();
        mailer.expect_send().times(0);

        let processor = build(dir.path(), lookup, rest, soap, export_repo, mailer).await;
        let outcome = processor
            .process(&signed_payload(&sample_claim(), Some(600)))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ProcessOutcome::Skipped {
                contract_id: 42,
                missing: vec!["contract"],
            }
        );
        assert_eq!(audit_lines(dir.path()), 1);
    }

    #[tokio::test]
    async fn test_redeem_runs_rest_export_soap_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut seq = Sequence::new();

        let mut rest = partner_mock("rest");
        rest.expect_submit()
            .withf(|_, coupons, _| coupons.len() == 2)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(receipt("rest")));

        let mut export_repo = MockExportRepository::new();
        export_repo.expect_dealer_contracts().returning(|_| {
            Ok(vec![DealerContractRow {
                contract_id: 42,
                dealer_id: 2975,
                vin: None,
                sale_date: None,
            }])
        });
        export_repo
            .expect_mark_export_sent()
            .withf(|id, _| *id == 3)
            .returning(|_, _| Ok(1));
        let mut mailer = MockMailer::new();
        mailer
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let mut soap = partner_mock("soap");
        soap.expect_submit()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(receipt("soap")));

        let processor = build(dir.path(), full_lookup(), rest, soap, export_repo, mailer).await;
        let outcome = processor
            .process(&signed_payload(&sample_claim(), None))
            .await
            .unwrap();

        let ProcessOutcome::Redeemed(report) = outcome else {
            panic!("expected redeemed outcome");
        };
        assert_eq!(report.contract_id, 42);
        assert_eq!(report.rest, Some(receipt("rest")));
        assert_eq!(report.soap, Some(receipt("soap")));
        assert_eq!(report.export.as_ref().map(ExportOutcome::label), Some("sent"));
        assert_eq!(audit_lines(dir.path()), 1);
    }

    #[tokio::test]
    async fn test_partner_failures_do_not_block_later_steps() {
        let dir = tempfile::tempdir().unwrap();

        let mut rest = partner_mock("rest");
        rest.expect_submit().times(1).returning(|_, _, _| {
            Err(ConsumerError::ClaimRejected {
                partner: "rest".to_string(),
                status: 500,
                body: "boom".to_string(),
            })
        });
        let mut soap = partner_mock("soap");
        soap.expect_submit().times(1).returning(|_, _, _| {
            Err(ConsumerError::ClaimTransport {
                partner: "soap".to_string(),
                reason: "dns error".to_string(),
            })
        });

        let mut export_repo = MockExportRepository::new();
        export_repo
            .expect_dealer_contracts()
            .returning(|_| Err(sqlx::Error::PoolTimedOut.into()));
        export_repo.expect_mark_export_sent().times(0);
        let mut mailer = MockMailer::new();
        mailer.expect_send().times(0);

        let processor = build(dir.path(), full_lookup(), rest, soap, export_repo, mailer).await;
        let outcome = processor
            .process(&signed_payload(&sample_claim(), None))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ProcessOutcome::Redeemed(RedemptionReport {
                contract_id: 42,
                rest: None,
                export: None,
                soap: None,
            })
        );
        assert_eq!(audit_lines(dir.path()), 1);
    }

    #[tokio::test]
    async fn test_lookup_error_propagates_without_audit() {
        let dir = tempfile::tempdir().unwrap();

        let mut lookup = MockRedemptionLookup::new();
        lookup
            .expect_contract_details()
            .returning(|_, _| Err(sqlx::Error::PoolTimedOut.into()));
        lookup.expect_coupon_details().times(0);
        lookup.expect_api_credentials().times(0);

        let mut rest = partner_mock("rest");
        rest.expect_submit().times(0);
        let mut soap = partner_mock("soap");
        soap.expect_submit().times(0);

        let processor = build(
            dir.path(),
            lookup,
            rest,
            soap,
            MockExportRepository::new(),
            MockMailer::new(),
        )
        .await;

        let result = processor
            .process(&signed_payload(&sample_claim(), None))
            .await;
        assert!(matches!(result, Err(ConsumerError::Shared(_))));
        assert_eq!(audit_lines(dir.path()), 0);
    }
}
