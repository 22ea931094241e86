//! Google OAuth2 访问令牌
//!
//! - 服务账号：用私钥签名 RS256 JWT，换取访问令牌
//! - 用户令牌：用 refresh_token 换取访问令牌
//!
//! 令牌缓存在内存中，过期前一分钟刷新

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::DriveError;

/// Drive 完整权限
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

/// 默认令牌端点
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// JWT-bearer 授权类型
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// 提前刷新的余量
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// 凭证来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// 服务账号 JSON 密钥
    ServiceAccount(PathBuf),
    /// 用户 OAuth 令牌文件
    UserToken(PathBuf),
}

impl Credential {
    pub fn path(&self) -> &Path {
        match self {
            Credential::ServiceAccount(path) | Credential::UserToken(path) => path,
        }
    }
}

/// 服务账号密钥文件
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

/// 用户令牌文件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserToken {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// JWT 声明
#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

/// 已加载的凭证
#[derive(Debug, Clone)]
enum LoadedCredential {
    ServiceAccount(ServiceAccountKey),
    UserToken(UserToken),
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// 访问令牌提供者
#[derive(Debug)]
pub struct TokenSource {
    credential: LoadedCredential,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenSource {
    /// 读取凭证文件
    pub async fn load(credential: &Credential) -> Result<Self, DriveError> {
        let path = credential.path();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| DriveError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        let loaded = match credential {
            Credential::ServiceAccount(_) => {
                let key: ServiceAccountKey = serde_json::from_str(&content).map_err(|e| {
                    DriveError::Auth(format!("无效的服务账号文件 {:?}: {}", path, e))
                })?;
                info!("使用服务账号: {}", key.client_email);
                LoadedCredential::ServiceAccount(key)
            }
            Credential::UserToken(_) => {
                let token: UserToken = serde_json::from_str(&content)
                    .map_err(|e| DriveError::Auth(format!("无效的令牌文件 {:?}: {}", path, e)))?;
                LoadedCredential::UserToken(token)
            }
        };

        Ok(Self {
            credential: loaded,
            cached: Mutex::new(None),
        })
    }

    /// 获取有效的访问令牌
    pub async fn access_token(&self, client: &Client) -> Result<String, DriveError> {
        let cached = self.cached.lock().clone();
        if let Some(cached) = cached {
            if cached.expires_at > Instant::now() + REFRESH_MARGIN {
                return Ok(cached.value);
            }
        }

        let response = match &self.credential {
            LoadedCredential::ServiceAccount(key) => {
                let assertion = sign_assertion(key)?;
                client
                    .post(&key.token_uri)
                    .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
                    .send()
                    .await?
            }
            LoadedCredential::UserToken(token) => {
                client
                    .post(&token.token_uri)
                    .form(&[
                        ("grant_type", "refresh_token"),
                        ("client_id", token.client_id.as_str()),
                        ("client_secret", token.client_secret.as_str()),
                        ("refresh_token", token.refresh_token.as_str()),
                    ])
                    .send()
                    .await?
            }
        };

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(DriveError::Auth(format!("令牌交换失败 ({}): {}", status, body)));
        }

        let token: TokenResponse = serde_json::from_str(&body)?;
        debug!("访问令牌已刷新，有效期 {}s", token.expires_in);

        *self.cached.lock() = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });

        Ok(token.access_token)
    }
}

/// 生成服务账号的签名断言
fn sign_assertion(key: &ServiceAccountKey) -> Result<String, DriveError> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        iss: &key.client_email,
        scope: DRIVE_SCOPE,
        aud: &key.token_uri,
        iat: now,
        exp: now + 3600,
    };

    let mut header = Header::new(Algorithm::RS256);
    header.kid = key.private_key_id.clone();

    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| DriveError::Auth(format!("无效的私钥: {}", e)))?;

    encode(&header, &claims, &encoding_key)
        .map_err(|e| DriveError::Auth(format!("JWT 签名失败: {}", e)))
}
