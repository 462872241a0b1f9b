//! 导出文件生成
//!
//! 每个经销商一个工作表，首行为表头，之后每份合同一行。

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime, TimeZone};
use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};

use crate::error::{ConsumerError, Result};
use crate::models::{ContractDetails, DealerContractRow};

/// 表头，顺序与 `ExportRow` 字段一致
pub const EXPORT_HEADERS: [&str; 6] = [
    "ContractID",
    "DealerID",
    "VIN",
    "SaleDate",
    "CustomerLName",
    "CustomerEmail",
];

/// 导出文件中的一行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRow {
    pub contract_id: i64,
    pub dealer_id: i64,
    pub vin: String,
    pub sale_date: String,
    pub customer_last_name: String,
    pub customer_email: String,
}

impl ExportRow {
    /// 经销商合同行，用本次兑换客户的 VIN / 姓 / 邮箱覆盖
    pub fn from_dealer_row(row: &DealerContractRow, redeemed: &ContractDetails) -> Self {
        Self {
            contract_id: row.contract_id,
            dealer_id: row.dealer_id,
            vin: redeemed.vin.clone().unwrap_or_default(),
            sale_date: format_sale_date(row.sale_date),
            customer_last_name: redeemed.customer_last_name.clone().unwrap_or_default(),
            customer_email: redeemed.customer_email.clone().unwrap_or_default(),
        }
    }

    fn write_to(&self, sheet: &mut Worksheet, row: u32) -> std::result::Result<(), XlsxError> {
        sheet.write_number(row, 0, self.contract_id as f64)?;
        sheet.write_number(row, 1, self.dealer_id as f64)?;
        sheet.write_string(row, 2, self.vin.as_str())?;
        sheet.write_string(row, 3, self.sale_date.as_str())?;
        sheet.write_string(row, 4, self.customer_last_name.as_str())?;
        sheet.write_string(row, 5, self.customer_email.as_str())?;
        Ok(())
    }
}

/// Unix 时间戳转本地日期 `MM-DD-YYYY`
pub fn format_sale_date(timestamp: Option<i64>) -> String {
    timestamp
        .and_then(|ts| Local.timestamp_opt(ts, 0).single())
        .map(|dt| dt.format("%m-%d-%Y").to_string())
        .unwrap_or_default()
}

/// `{dealer}-{pcp_user}-export_{dd-mm-YYYY_HH-MM-SS}.xlsx`
pub fn export_file_name(dealer_id: i64, pcp_user_id: i64, at: NaiveDateTime) -> String {
    format!(
        "{dealer_id}-{pcp_user_id}-export_{}.xlsx",
        at.format("%d-%m-%Y_%H-%M-%S")
    )
}

fn build_workbook(rows: &[ExportRow]) -> std::result::Result<Workbook, XlsxError> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();
    let sheet = workbook.add_worksheet();

    for (col, title) in EXPORT_HEADERS.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *title, &header)?;
    }
    for (i, row) in rows.iter().enumerate() {
        row.write_to(sheet, i as u32 + 1)?;
    }
    Ok(workbook)
}

/// 写入导出文件，目录不存在时自动创建
///
/// 同步 IO，在异步上下文中请使用 [`write_export_async`]。
pub fn write_export(directory: &Path, file_name: &str, rows: &[ExportRow]) -> Result<PathBuf> {
    std::fs::create_dir_all(directory)
        .map_err(|e| ConsumerError::Export(format!("创建目录 {} 失败: {e}", directory.display())))?;

    let path = directory.join(file_name);
    let mut workbook = build_workbook(rows).map_err(|e| ConsumerError::Export(e.to_string()))?;
    workbook
        .save(&path)
        .map_err(|e| ConsumerError::Export(format!("写入文件 {} 失败: {e}", path.display())))?;

    Ok(path)
}

/// 在阻塞线程池中写入导出文件
pub async fn write_export_async(
    directory: PathBuf,
    file_name: String,
    rows: Vec<ExportRow>,
) -> Result<PathBuf> {
    tokio::task::spawn_blocking(move || write_export(&directory, &file_name, &rows))
        .await
        .map_err(|e| ConsumerError::Export(format!("导出任务异常退出: {e}")))?
}
