// Google Drive 错误类型

use std::path::PathBuf;
use thiserror::Error;

/// Google Drive 操作错误
#[derive(Debug, Error)]
pub enum DriveError {
    /// 链接中找不到 ID
    #[error("Google Drive ID could not be found in the provided link")]
    IdNotFound,

    /// API 返回的错误（已解析出 reason）
    #[error("HttpError {status}: {message}")]
    Api {
        status: u16,
        reason: Option<String>,
        message: String,
    },

    /// 传输层错误
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// 响应体无法解析
    #[error("invalid response: {0}")]
    Decode(#[from] serde_json::Error),

    /// 授权失败
    #[error("authorization failed: {0}")]
    Auth(String),

    /// 文件被服务端拒绝复制
    #[error("file could not be copied: {0}")]
    CopyRejected(String),

    /// 凭证文件读取失败
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DriveError {
    /// API 错误的 reason 字段
    pub fn reason(&self) -> Option<&str> {
        match self {
            DriveError::Api { reason, .. } => reason.as_deref(),
            _ => None,
        }
    }

    /// 是否为限流错误
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self.reason(),
            Some("userRateLimitExceeded") | Some("dailyLimitExceeded")
        )
    }

    /// 可重试的临时错误：限流、服务端 5xx 或传输层失败
    pub fn is_transient(&self) -> bool {
        match self {
            DriveError::Api { status, .. } => *status >= 500 || self.is_rate_limited(),
            DriveError::Http(_) => true,
            _ => false,
        }
    }

    /// 对象不存在（触发备用认证重试）
    pub fn is_not_found(&self) -> bool {
        self.to_string().contains("File not found")
    }

    /// 对象不存在或权限不足
    pub fn is_not_found_or_forbidden(&self) -> bool {
        self.is_not_found()
            || self.reason() == Some("insufficientFilePermissions")
            || self.to_string().contains("insufficientFilePermissions")
    }
}
