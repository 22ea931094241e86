// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务账号配置
    #[serde(default)]
    pub accounts: AccountsConfig,
    /// Google Drive REST 配置
    #[serde(default)]
    pub drive: DriveConfig,
    /// rclone 进程配置
    #[serde(default)]
    pub rclone: RcloneConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
        }
    }
}

/// 服务账号配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountsConfig {
    /// 是否全局启用服务账号
    #[serde(default)]
    pub use_service_accounts: bool,
    /// 服务账号 JSON 文件目录
    #[serde(default = "default_accounts_dir")]
    pub accounts_dir: PathBuf,
}

fn default_accounts_dir() -> PathBuf {
    PathBuf::from("accounts")
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            use_service_accounts: false,
            accounts_dir: default_accounts_dir(),
        }
    }
}

/// Google Drive REST 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveConfig {
    /// 默认用户令牌文件
    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,
    /// 按用户区分的令牌目录（`<dir>/<user_id>.json`）
    #[serde(default = "default_user_token_dir")]
    pub user_token_dir: PathBuf,
    /// 目标是否为共享盘（共享盘不设置公开权限）
    #[serde(default)]
    pub is_team_drive: bool,
    /// 新建文件夹的描述
    #[serde(default = "default_folder_description")]
    pub folder_description: String,
    /// 远端调用的重试策略
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_token_path() -> PathBuf {
    PathBuf::from("token.json")
}

fn default_user_token_dir() -> PathBuf {
    PathBuf::from("tokens")
}

fn default_folder_description() -> String {
    "Uploaded by cloud-mirror-rust".to_string()
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            token_path: default_token_path(),
            user_token_dir: default_user_token_dir(),
            is_team_drive: false,
            folder_description: default_folder_description(),
            retry: RetryConfig::default(),
        }
    }
}

impl DriveConfig {
    /// 指定用户的令牌文件路径
    pub fn user_token_path(&self, user_id: i64) -> PathBuf {
        self.user_token_dir.join(format!("{}.json", user_id))
    }
}

/// 重试策略配置（秒）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// 总尝试次数
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// 指数退避基数
    #[serde(default = "default_base_secs")]
    pub base_secs: u64,
    /// 最小等待
    #[serde(default = "default_min_backoff_secs")]
    pub min_backoff_secs: u64,
    /// 最大等待
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_secs() -> u64 {
    2
}
fn default_min_backoff_secs() -> u64 {
    3
}
fn default_max_backoff_secs() -> u64 {
    6
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_secs: 2,
            min_backoff_secs: 3,
            max_backoff_secs: 6,
        }
    }
}

/// rclone 进程配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RcloneConfig {
    /// 可执行文件
    #[serde(default = "default_rclone_binary")]
    pub binary: PathBuf,
    /// 默认配置文件
    #[serde(default = "default_rclone_config_path")]
    pub config_path: PathBuf,
    /// 按用户区分的配置目录（`mrcc:` 目标使用 `<dir>/<user_id>.conf`）
    #[serde(default = "default_user_config_dir")]
    pub user_config_dir: PathBuf,
    /// 服务账号合成配置的缓存目录
    #[serde(default = "default_sa_config_dir")]
    pub sa_config_dir: PathBuf,
    /// 并发传输数
    #[serde(default = "default_transfers")]
    pub transfers: u32,
    /// 全局附加参数（`|` 分隔，`key:value` 或单独的 flag）
    #[serde(default)]
    pub flags: Option<String>,
    /// rclone 自身的日志文件
    #[serde(default = "default_rclone_log_file")]
    pub log_file: PathBuf,
}

fn default_rclone_binary() -> PathBuf {
    PathBuf::from("rclone")
}

fn default_rclone_config_path() -> PathBuf {
    PathBuf::from("rclone.conf")
}

fn default_user_config_dir() -> PathBuf {
    PathBuf::from("rclone")
}

fn default_sa_config_dir() -> PathBuf {
    PathBuf::from("rclone_sa")
}

fn default_transfers() -> u32 {
    4
}

fn default_rclone_log_file() -> PathBuf {
    PathBuf::from("rlog.txt")
}

impl Default for RcloneConfig {
    fn default() -> Self {
        Self {
            binary: default_rclone_binary(),
            config_path: default_rclone_config_path(),
            user_config_dir: default_user_config_dir(),
            sa_config_dir: default_sa_config_dir(),
            transfers: default_transfers(),
            flags: None,
            log_file: default_rclone_log_file(),
        }
    }
}

impl RcloneConfig {
    /// 指定用户的私有配置文件
    pub fn user_config_path(&self, user_id: i64) -> PathBuf {
        self.user_config_dir.join(format!("{}.conf", user_id))
    }

    /// 全局附加参数（空字符串视为未设置）
    pub fn global_flags(&self) -> Option<&str> {
        self.flags.as_deref().filter(|f| !f.trim().is_empty())
    }
}

impl AppConfig {
    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.rclone.transfers == 0 {
            anyhow::bail!("rclone.transfers 必须大于 0");
        }
        if self.drive.retry.max_attempts == 0 {
            anyhow::bail!("drive.retry.max_attempts 必须大于 0");
        }
        if self.drive.retry.min_backoff_secs > self.drive.retry.max_backoff_secs {
            anyhow::bail!(
                "drive.retry.min_backoff_secs ({}) 不能大于 max_backoff_secs ({})",
                self.drive.retry.min_backoff_secs,
                self.drive.retry.max_backoff_secs
            );
        }
        Ok(())
    }

    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;
        config.validate().context("配置文件校验失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.validate().context("保存配置失败")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);
        Ok(())
    }

    /// 加载或创建默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                let default_config = Self::default();

                // 首次启动：写出默认配置，便于用户修改
                if !std::path::Path::new(path).exists() {
                    if let Err(e) = default_config.save_to_file(path).await {
                        tracing::error!("保存默认配置失败: {}", e);
                    }
                }

                default_config
            }
        }
    }
}
