//! rclone 配置文件读取与服务账号配置合成

use dashmap::DashMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::RcloneError;
use crate::accounts::CredentialPool;

/// 解析后的 INI 文件：节名 -> (小写选项名 -> 值)
pub type IniSections = HashMap<String, HashMap<String, String>>;

/// 解析 INI 文本
///
/// 选项名不区分大小写（统一转小写），支持 `=` 和 `:` 分隔，`#`、`;` 开头为注释
pub fn parse_ini(content: &str) -> IniSections {
    let mut sections = IniSections::new();
    let mut current: Option<String> = None;

    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = name.trim().to_string();
            sections.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }

        let Some(section) = current.as_ref() else {
            continue;
        };
        let split_at = match (line.find('='), line.find(':')) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => continue,
        };
        let key = line[..split_at].trim().to_lowercase();
        let value = line[split_at + 1..].trim().to_string();
        if let Some(options) = sections.get_mut(section) {
            options.insert(key, value);
        }
    }

    sections
}

/// 一个远端的配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteProfile {
    /// 远端名
    pub name: String,
    /// 后端类型（`drive`、`s3` ...）
    pub remote_type: String,
    /// 共享盘 ID
    pub team_drive: Option<String>,
    /// 根目录 ID
    pub root_folder_id: Option<String>,
    /// 全部选项
    pub options: HashMap<String, String>,
}

impl RemoteProfile {
    fn from_options(name: &str, options: HashMap<String, String>) -> Result<Self, RcloneError> {
        let remote_type = options
            .get("type")
            .cloned()
            .ok_or_else(|| RcloneError::MissingType(name.to_string()))?;
        let non_empty = |key: &str| options.get(key).filter(|v| !v.is_empty()).cloned();

        Ok(Self {
            name: name.to_string(),
            team_drive: non_empty("team_drive"),
            root_folder_id: non_empty("root_folder_id"),
            remote_type,
            options,
        })
    }

    /// 是否为 Google Drive 远端
    pub fn is_drive(&self) -> bool {
        self.remote_type == "drive"
    }

    /// 服务账号配置需要的目标选项（共享盘优先）
    pub fn sa_target(&self) -> Option<(&'static str, &str)> {
        if let Some(id) = self.team_drive.as_deref() {
            Some(("team_drive", id))
        } else {
            self.root_folder_id
                .as_deref()
                .map(|id| ("root_folder_id", id))
        }
    }
}

/// 读取配置文件中指定远端的配置
pub async fn remote_options(config_path: &Path, remote: &str) -> Result<RemoteProfile, RcloneError> {
    let content = tokio::fs::read_to_string(config_path)
        .await
        .map_err(|e| RcloneError::Io {
            path: config_path.to_path_buf(),
            source: e,
        })?;

    let mut sections = parse_ini(&content);
    let options = sections
        .remove(remote)
        .ok_or_else(|| RcloneError::MissingRemote {
            remote: remote.to_string(),
            path: config_path.to_path_buf(),
        })?;

    RemoteProfile::from_options(remote, options)
}

/// 服务账号节名
pub fn sa_section(index: usize) -> String {
    format!("sa{:03}", index)
}

/// 生成服务账号配置文本（每个凭证一节）
pub fn render_sa_config(pool: &CredentialPool, option: &str, target_id: &str) -> String {
    pool.files()
        .iter()
        .enumerate()
        .map(|(i, file)| {
            format!(
                "[{}]\ntype = drive\nscope = drive\nservice_account_file = {}\n{} = {}\n\n",
                sa_section(i),
                file.display(),
                option,
                target_id
            )
        })
        .collect()
}

/// 按远端缓存的服务账号配置
///
/// 首次写入不加锁，多个任务同时写同一文件时内容一致
#[derive(Debug)]
pub struct ServiceAccountConfigs {
    dir: PathBuf,
    cache: DashMap<String, Option<PathBuf>>,
}

impl ServiceAccountConfigs {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: DashMap::new(),
        }
    }

    /// 获取（必要时生成）远端的服务账号配置
    ///
    /// 远端既没有共享盘 ID 也没有根目录 ID 时返回 None，调用方继续使用原配置
    pub async fn create(
        &self,
        remote: &str,
        profile: &RemoteProfile,
        pool: &CredentialPool,
    ) -> Result<Option<PathBuf>, RcloneError> {
        if let Some(cached) = self.cache.get(remote) {
            return Ok(cached.value().clone());
        }

        let path = self.dir.join(format!("{}.conf", remote));
        if tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
        {
            debug!("复用服务账号配置: {:?}", path);
            self.cache.insert(remote.to_string(), Some(path.clone()));
            return Ok(Some(path));
        }

        let Some((option, target_id)) = profile.sa_target() else {
            self.cache.insert(remote.to_string(), None);
            return Ok(None);
        };

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| RcloneError::Io {
                path: self.dir.clone(),
                source: e,
            })?;
        tokio::fs::write(&path, render_sa_config(pool, option, target_id))
            .await
            .map_err(|e| RcloneError::Io {
                path: path.clone(),
                source: e,
            })?;

        info!("已生成服务账号配置: {:?}（{} 个账号）", path, pool.len());
        self.cache.insert(remote.to_string(), Some(path.clone()));
        Ok(Some(path))
    }
}
