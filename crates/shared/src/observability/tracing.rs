//! 日志初始化
//!
//! stdout 与可选的日志文件同时输出，文件层关闭 ANSI 颜色。
//! 日志文件不可写时回退到系统临时目录，仍不可写则只输出到 stdout。

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Result;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use super::ObservabilityConfig;

/// 初始化 tracing subscriber
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = if config.json_logs {
        fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .boxed()
    };

    let file_layer = config
        .log_file
        .as_deref()
        .and_then(open_log_file)
        .map(|file| {
            fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(Mutex::new(file))
                .boxed()
        });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    Ok(())
}

/// 以追加模式打开日志文件
fn open_log_file(path: &str) -> Option<File> {
    let primary = PathBuf::from(path);
    append(&primary).or_else(|| {
        let fallback = std::env::temp_dir().join(primary.file_name()?);
        let file = append(&fallback);
        if file.is_some() {
            eprintln!(
                "log file {} is not writable, falling back to {}",
                primary.display(),
                fallback.display()
            );
        }
        file
    })
}

fn append(path: &Path) -> Option<File> {
    OpenOptions::new().create(true).append(true).open(path).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_log_file_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("consumer.log");
        assert!(open_log_file(path.to_str().unwrap()).is_some());
        assert!(path.exists());
    }

    #[test]
    fn test_open_log_file_falls_back_to_temp_dir() {
        let path = "/nonexistent-dir-for-tests/redemption-consumer-test.log";
        let file = open_log_file(path);
        assert!(file.is_some());
        let fallback = std::env::temp_dir().join("redemption-consumer-test.log");
        assert!(fallback.exists());
        let _ = std::fs::remove_file(fallback);
    }
}
