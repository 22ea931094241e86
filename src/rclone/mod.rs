//! rclone 子进程传输引擎
//!
//! - `config`: 远端配置读取、服务账号配置合成
//! - `command`: 命令行拼装
//! - `progress`: `-P` 输出解析
//! - `transfer`: 进程监管、限流轮换、链接解析

pub mod command;
pub mod config;
pub mod progress;
pub mod transfer;

pub use command::{Method, RcloneCommand};
pub use config::{parse_ini, remote_options, RemoteProfile, ServiceAccountConfigs};
pub use progress::{LiveProgress, ProgressParser, ProgressSnapshot};
pub use transfer::{RcloneTransfer, TransferKind};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::accounts::AccountStore;
use crate::config::RcloneConfig;

/// rclone 相关错误
#[derive(Debug, Error)]
pub enum RcloneError {
    /// 配置文件读写失败
    #[error("failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// 配置文件中没有该远端
    #[error("remote '{remote}' not found in {path:?}")]
    MissingRemote { remote: String, path: PathBuf },
    /// 远端缺少 `type`
    #[error("remote '{0}' has no type")]
    MissingType(String),
}

/// 所有 rclone 任务共享的环境
#[derive(Debug)]
pub struct RcloneHelper {
    settings: RcloneConfig,
    use_service_accounts: bool,
    accounts: Arc<AccountStore>,
    sa_configs: ServiceAccountConfigs,
}

impl RcloneHelper {
    pub fn new(settings: RcloneConfig, accounts: Arc<AccountStore>, use_service_accounts: bool) -> Self {
        let sa_configs = ServiceAccountConfigs::new(settings.sa_config_dir.clone());
        Self {
            settings,
            use_service_accounts,
            accounts,
            sa_configs,
        }
    }

    pub fn settings(&self) -> &RcloneConfig {
        &self.settings
    }

    pub fn use_service_accounts(&self) -> bool {
        self.use_service_accounts
    }

    pub fn accounts(&self) -> &Arc<AccountStore> {
        &self.accounts
    }

    pub fn sa_configs(&self) -> &ServiceAccountConfigs {
        &self.sa_configs
    }

    /// 是否为默认配置文件
    pub fn is_default_config(&self, path: &Path) -> bool {
        path == self.settings.config_path
    }
}
