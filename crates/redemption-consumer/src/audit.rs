//! 审计记录
//!
//! 每条通过令牌校验的消息追加写入两个文件：
//! - `processed_messages.jsonl`：JSON Lines，`seq` 由本模块分配，重启后从文件末尾续号
//! - `transactions.log`：`{date} - {request_type} - {claim}` 纯文本行
//!
//! 两个文件都以追加方式打开，单进程内通过互斥锁保证条目不交错。

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use redemption_shared::config::AuditConfig;
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{ConsumerError, Result};
use crate::models::DecodedClaim;

/// 一条审计记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub date: DateTime<Utc>,
    pub request_type: String,
    pub claim: DecodedClaim,
}

struct AuditFiles {
    processed: File,
    transactions: File,
    next_seq: u64,
}

pub struct AuditLogger {
    processed_path: PathBuf,
    files: Mutex<AuditFiles>,
}

fn audit_err(path: &Path, e: impl std::fmt::Display) -> ConsumerError {
    ConsumerError::Audit(format!("{}: {e}", path.display()))
}

async fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| audit_err(parent, e))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| audit_err(path, e))
}

/// 续号时只读取文件末尾这么多字节
const TAIL_BYTES: u64 = 64 * 1024;

/// 已有文件的状态：最后一条记录的序号（文件不存在时为 0），以及末行是否被截断
///
/// 只扫描末尾 [`TAIL_BYTES`]，非 UTF-8 内容按有损方式解码后当作无法解析的行跳过。
async fn scan_existing(path: &Path) -> Result<(u64, bool)> {
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((0, false)),
        Err(e) => return Err(audit_err(path, e)),
    };
    let len = file.metadata().await.map_err(|e| audit_err(path, e))?.len();
    let offset = len.saturating_sub(TAIL_BYTES);
    file.seek(SeekFrom::Start(offset))
        .await
        .map_err(|e| audit_err(path, e))?;
    let mut tail = Vec::with_capacity((len - offset) as usize);
    file.read_to_end(&mut tail)
        .await
        .map_err(|e| audit_err(path, e))?;

    let truncated = tail.last().is_some_and(|b| *b != b'\n');
    let content = String::from_utf8_lossy(&tail);
    // 从文件中间开始读时，第一行不完整
    let body = if offset > 0 {
        content.split_once('\n').map_or("", |(_, rest)| rest)
    } else {
        content.as_ref()
    };

    let last = body
        .lines()
        .rev()
        .filter(|line| !line.trim().is_empty())
        .find_map(|line| match serde_json::from_str::<AuditEntry>(line) {
            Ok(entry) => Some(entry.seq),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "跳过无法解析的审计行");
                None
            }
        });

    Ok((last.unwrap_or(0), truncated))
}

impl AuditLogger {
    pub async fn open(config: &AuditConfig) -> Result<Self> {
        let processed_path = PathBuf::from(&config.processed_file);
        let transactions_path = PathBuf::from(&config.transaction_log);

        let (last_seq, truncated) = scan_existing(&processed_path).await?;
        let next_seq = last_seq + 1;
        let mut processed = open_append(&processed_path).await?;
        if truncated {
            // 上次写入中途退出，先补换行避免新记录接在残行后面
            processed
                .write_all(b"\n")
                .await
                .map_err(|e| audit_err(&processed_path, e))?;
        }
        let transactions = open_append(&transactions_path).await?;

        debug!(path = %processed_path.display(), next_seq, "审计日志已打开");

        Ok(Self {
            processed_path,
            files: Mutex::new(AuditFiles {
                processed,
                transactions,
                next_seq,
            }),
        })
    }

    /// 追加一条记录，返回分配了序号的条目
    pub async fn record(&self, request_type: &str, claim: &DecodedClaim) -> Result<AuditEntry> {
        let mut files = self.files.lock().await;

        let entry = AuditEntry {
            seq: files.next_seq,
            date: Utc::now(),
            request_type: request_type.to_string(),
            claim: claim.clone(),
        };

        let mut line = serde_json::to_string(&entry).map_err(|e| audit_err(&self.processed_path, e))?;
        line.push('\n');
        let claim_json = serde_json::to_string(&entry.claim).map_err(|e| audit_err(&self.processed_path, e))?;
        let transaction_line = format!(
            "{} - {} - {}\n",
            entry.date.to_rfc3339(),
            entry.request_type,
            claim_json
        );

        files
            .processed
            .write_all(line.as_bytes())
            .await
            .map_err(|e| audit_err(&self.processed_path, e))?;
        files
            .processed
            .flush()
            .await
            .map_err(|e| audit_err(&self.processed_path, e))?;
        files.next_seq += 1;

        files
            .transactions
            .write_all(transaction_line.as_bytes())
            .await
            .map_err(|e| ConsumerError::Audit(e.to_string()))?;
        files
            .transactions
            .flush()
            .await
            .map_err(|e| ConsumerError::Audit(e.to_string()))?;

        Ok(entry)
    }
}
