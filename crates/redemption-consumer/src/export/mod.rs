//! 导出通知
//!
//! 为经销商生成合同导出文件，放到 Web 可访问目录，邮件发送下载链接，
//! 发送成功后才回写导出记录的发送标记。

pub mod mailer;
pub mod spreadsheet;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use redemption_shared::config::ExportConfig;
use redemption_shared::observability::metrics::record_export_email;
use tracing::{info, instrument, warn};

use crate::error::Result;
use crate::models::ContractDetails;
use crate::repository::ExportRepository;

pub use mailer::{EmailMessage, Mailer, SmtpMailer};
pub use spreadsheet::ExportRow;

pub const EXPORT_SUBJECT: &str = "Coverage Export File";

/// 导出记录中 EmailSentDate 的格式
const SENT_AT_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

/// 一次导出的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    /// 合同没有经销商联系邮箱
    NoRecipient,
    /// 经销商名下没有合同
    NoContracts,
    /// 文件已生成但邮件发送失败，发送标记未更新
    EmailFailed { file: PathBuf, reason: String },
    Sent { file: PathBuf, rows_updated: u64 },
}

impl ExportOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NoRecipient => "no_recipient",
            Self::NoContracts => "no_contracts",
            Self::EmailFailed { .. } => "failed",
            Self::Sent { .. } => "sent",
        }
    }
}

/// 下载邮件正文
pub fn render_email_body(download_url: &str, retention_days: u32) -> String {
    format!(
        "Hi,<br><br>\n\
         Your data is available on this link \
         <a href=\"{download_url}\" target=\"_blank\">Download</a>.<br><br>\n\
         Please download from here. This will be retained on server for {retention_days} days.<br><br>\n\
         Thanks.<br>\n\
         PROCARMA Team\n"
    )
}

pub struct ExportNotifier {
    repository: Arc<dyn ExportRepository>,
    mailer: Arc<dyn Mailer>,
    config: ExportConfig,
}

impl ExportNotifier {
    pub fn new(
        repository: Arc<dyn ExportRepository>,
        mailer: Arc<dyn Mailer>,
        config: ExportConfig,
    ) -> Self {
        Self {
            repository,
            mailer,
            config,
        }
    }

    fn recipient(&self, contract: &ContractDetails) -> Option<String> {
        self.config
            .recipient_override
            .as_deref()
            .or(contract.contact_email.as_deref())
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .map(str::to_string)
    }

    fn download_url(&self, file_name: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.public_path.trim_matches('/'),
            file_name
        )
    }

    /// 生成导出文件并邮件通知，`export_id` 为待回写的导出记录
    #[instrument(skip_all, fields(dealer_id = contract.dealer_id, export_id = export_id))]
    pub async fn export_to_email(
        &self,
        contract: &ContractDetails,
        export_id: i64,
    ) -> Result<ExportOutcome> {
        let Some(recipient) = self.recipient(contract) else {
            info!("合同没有经销商联系邮箱，跳过导出");
            record_export_email(ExportOutcome::NoRecipient.label());
            return Ok(ExportOutcome::NoRecipient);
        };

        let contracts = self.repository.dealer_contracts(contract.dealer_id).await?;
        if contracts.is_empty() {
            info!("经销商名下没有合同，跳过导出");
            record_export_email(ExportOutcome::NoContracts.label());
            return Ok(ExportOutcome::NoContracts);
        }

        let rows: Vec<ExportRow> = contracts
            .iter()
            .map(|row| ExportRow::from_dealer_row(row, contract))
            .collect();

        let now = Local::now();
        let file_name = spreadsheet::export_file_name(
            contract.dealer_id,
            self.config.pcp_user_id,
            now.naive_local(),
        );
        let row_count = rows.len();
        let download_url = self.download_url(&file_name);
        let file = spreadsheet::write_export_async(
            PathBuf::from(&self.config.directory),
            file_name,
            rows,
        )
        .await?;
        info!(file = %file.display(), rows = row_count, "导出文件已生成");

        let message = EmailMessage {
            to: recipient,
            subject: EXPORT_SUBJECT.to_string(),
            html_body: render_email_body(&download_url, self.config.retention_days),
        };

        if let Err(e) = self.mailer.send(&message).await {
            warn!(error = %e, to = %message.to, "导出邮件发送失败，保留未发送状态");
            record_export_email("failed");
            return Ok(ExportOutcome::EmailFailed {
                file,
                reason: e.to_string(),
            });
        }

        let sent_at = now.format(SENT_AT_FORMAT).to_string();
        let rows_updated = self.repository.mark_export_sent(export_id, &sent_at).await?;
        if rows_updated == 0 {
            warn!("导出记录不存在，发送标记未更新");
        }
        record_export_email("sent");

        Ok(ExportOutcome::Sent { file, rows_updated })
    }
}
