//! 链接解析与认证模式选择
//!
//! 链接或目标字符串可以带模式前缀：
//! - `mtp:` 使用用户自己的令牌，关闭服务账号
//! - `sa:`  强制使用服务账号
//! - `tp:`  使用默认令牌，关闭服务账号

use regex::Regex;
use std::path::{Path, PathBuf};

use super::DriveError;
use crate::listener::UserContext;

const USER_TOKEN_PREFIX: &str = "mtp:";
const SERVICE_ACCOUNT_PREFIX: &str = "sa:";
const DEFAULT_TOKEN_PREFIX: &str = "tp:";

/// 单次尝试的认证上下文
///
/// 每次尝试开始时确定，尝试过程中不可变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// 是否使用服务账号
    pub use_sa: bool,
    /// 令牌文件（不使用服务账号时生效）
    pub token_path: PathBuf,
}

impl AuthContext {
    pub fn new(use_sa: bool, token_path: impl Into<PathBuf>) -> Self {
        Self {
            use_sa,
            token_path: token_path.into(),
        }
    }

    /// 备用认证：关闭服务账号，其余不变
    pub fn without_service_accounts(&self) -> Self {
        Self {
            use_sa: false,
            token_path: self.token_path.clone(),
        }
    }

    /// 默认令牌不存在而用户令牌存在时，改用用户令牌
    pub fn fallback_to_user_token(mut self, user_token: Option<&Path>) -> Self {
        if let Some(user_token) = user_token {
            if !self.token_path.exists() && user_token.exists() {
                self.token_path = user_token.to_path_buf();
            }
        }
        self
    }
}

fn strip_prefix<'a>(value: &'a str, prefix: &str) -> &'a str {
    value.strip_prefix(prefix).unwrap_or(value)
}

/// 根据链接前缀和用户设置确定认证模式，返回去掉前缀的链接
pub fn resolve_link_mode(
    link: &str,
    user: &UserContext,
    current: AuthContext,
    user_token: Option<&Path>,
) -> (String, AuthContext) {
    let user_mode = user.user_id.is_some() && link.starts_with(USER_TOKEN_PREFIX);
    let private_mode = user.private_link && !user.prefers_service_account;

    match user_token {
        Some(token) if user_mode || private_mode => (
            strip_prefix(link, USER_TOKEN_PREFIX).to_string(),
            AuthContext::new(false, token),
        ),
        _ if link.starts_with(SERVICE_ACCOUNT_PREFIX) || user.prefers_service_account => (
            strip_prefix(link, SERVICE_ACCOUNT_PREFIX).to_string(),
            AuthContext::new(true, current.token_path),
        ),
        _ if link.starts_with(DEFAULT_TOKEN_PREFIX) => (
            strip_prefix(link, DEFAULT_TOKEN_PREFIX).to_string(),
            AuthContext::new(false, current.token_path),
        ),
        _ => (link.to_string(), current),
    }
}

/// 克隆目标的前缀处理（目标或源链接带 `mtp:` 时使用用户令牌）
pub fn resolve_destination_mode(
    destination: &str,
    link: &str,
    user: &UserContext,
    current: AuthContext,
    user_token: Option<&Path>,
) -> (String, AuthContext) {
    let wants_user_token =
        destination.starts_with(USER_TOKEN_PREFIX) || link.starts_with(USER_TOKEN_PREFIX);

    match user_token {
        Some(token) if wants_user_token => (
            strip_prefix(destination, USER_TOKEN_PREFIX).to_string(),
            AuthContext::new(false, token),
        ),
        _ if destination.starts_with(DEFAULT_TOKEN_PREFIX) => (
            strip_prefix(destination, DEFAULT_TOKEN_PREFIX).to_string(),
            AuthContext::new(false, current.token_path),
        ),
        _ if destination.starts_with(SERVICE_ACCOUNT_PREFIX) || user.prefers_service_account => (
            strip_prefix(destination, SERVICE_ACCOUNT_PREFIX).to_string(),
            AuthContext::new(true, current.token_path),
        ),
        _ => (destination.to_string(), current),
    }
}

/// 是否为裸 ID
pub fn is_gdrive_id(value: &str) -> bool {
    Regex::new(r"^(?:[A-Za-z0-9_-]{33}|[A-Za-z0-9_-]{19}|root)$")
        .map(|re| re.is_match(value))
        .unwrap_or(false)
}

/// 从链接中提取对象 ID
pub fn extract_id(link: &str) -> Result<String, DriveError> {
    if is_gdrive_id(link) {
        return Ok(link.to_string());
    }

    if link.contains("folders") || link.contains("file") {
        let re = Regex::new(
            r"https://drive\.google\.com/(?:drive(.*?)/folders/|file(.*?)?/d/)([-\w]+)",
        )
        .map_err(|_| DriveError::IdNotFound)?;
        return re
            .captures(link)
            .and_then(|caps| caps.get(3))
            .map(|m| m.as_str().to_string())
            .ok_or(DriveError::IdNotFound);
    }

    let url = reqwest::Url::parse(link).map_err(|_| DriveError::IdNotFound)?;
    url.query_pairs()
        .find(|(key, _)| key == "id")
        .map(|(_, value)| value.into_owned())
        .ok_or(DriveError::IdNotFound)
}
