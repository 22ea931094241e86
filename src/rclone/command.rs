// rclone 命令行拼装

use std::path::{Path, PathBuf};

use crate::config::RcloneConfig;

/// 传输方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Copy,
    Move,
    /// 按 ID 复制单个文件
    BackendCopyId,
}

impl Method {
    fn args(&self) -> &'static [&'static str] {
        match self {
            Method::Copy => &["copy"],
            Method::Move => &["move"],
            Method::BackendCopyId => &["backend", "copyid"],
        }
    }
}

/// 把 `a|--b:c| --d ` 形式的附加参数拆成参数列表
///
/// `key:value` 拆成两个参数，其余原样（去掉首尾空白）
pub fn split_flags(flags: &str) -> Vec<String> {
    let mut args = Vec::new();
    for flag in flags.split('|') {
        if let Some((key, value)) = flag.split_once(':') {
            args.push(key.trim().to_string());
            args.push(value.trim().to_string());
        } else {
            let flag = flag.trim();
            if !flag.is_empty() {
                args.push(flag.to_string());
            }
        }
    }
    args
}

/// 一条传输命令
#[derive(Debug, Clone)]
pub struct RcloneCommand {
    config_path: PathBuf,
    method: Method,
    source: String,
    destinations: Vec<String>,
    transfers: u32,
    extension_filter: Vec<String>,
    log_file: PathBuf,
    tuning: Vec<String>,
    user_flags: Option<String>,
}

impl RcloneCommand {
    /// `user_flags` 为任务级参数，未设置时使用全局参数
    pub fn new(
        settings: &RcloneConfig,
        config_path: &Path,
        method: Method,
        source: impl Into<String>,
        destinations: Vec<String>,
        extension_filter: &[String],
        user_flags: Option<&str>,
    ) -> Self {
        let user_flags = user_flags
            .filter(|f| !f.trim().is_empty())
            .or_else(|| settings.global_flags())
            .map(str::to_string);

        Self {
            config_path: config_path.to_path_buf(),
            method,
            source: source.into(),
            destinations,
            transfers: settings.transfers,
            extension_filter: extension_filter.to_vec(),
            log_file: settings.log_file.clone(),
            tuning: Vec::new(),
            user_flags,
        }
    }

    /// 是否带有用户（或全局）参数；有则不追加后端调优参数
    pub fn has_user_flags(&self) -> bool {
        self.user_flags.is_some()
    }

    /// 追加参数，位于用户参数之前
    pub fn push_flags(&mut self, flags: &[&str]) {
        self.tuning.extend(flags.iter().map(|f| f.to_string()));
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn destinations(&self) -> &[String] {
        &self.destinations
    }

    /// 把源的远端名替换为服务账号节
    pub fn set_source_remote(&mut self, section: &str) {
        self.source = replace_remote(&self.source, section);
    }

    /// 把第一个目标的远端名替换为服务账号节
    pub fn set_destination_remote(&mut self, section: &str) {
        if let Some(dest) = self.destinations.first_mut() {
            *dest = replace_remote(dest, section);
        }
    }

    /// 完整参数（不含可执行文件本身）
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--fast-list".to_string(),
            "--config".to_string(),
            self.config_path.display().to_string(),
            "-P".to_string(),
        ];
        args.extend(self.method.args().iter().map(|a| a.to_string()));
        args.push(self.source.clone());
        args.extend(self.destinations.iter().cloned());
        args.extend([
            "--transfers".to_string(),
            self.transfers.to_string(),
            "--exclude".to_string(),
            format!("*.{{{}}}", self.extension_filter.join(",")),
            "--retries-sleep".to_string(),
            "3s".to_string(),
            "--ignore-case".to_string(),
            "--low-level-retries".to_string(),
            "1".to_string(),
            "-M".to_string(),
            "--log-file".to_string(),
            self.log_file.display().to_string(),
            "--log-level".to_string(),
            "DEBUG".to_string(),
        ]);
        args.extend(self.tuning.iter().cloned());
        if let Some(flags) = &self.user_flags {
            args.extend(split_flags(flags));
        }
        args
    }
}

fn replace_remote(path: &str, section: &str) -> String {
    match path.split_once(':') {
        Some((_, rest)) => format!("{}:{}", section, rest),
        None => format!("{}:{}", section, path),
    }
}

/// `lsjson` 参数
pub fn lsjson_args(config_path: &Path, path: &str) -> Vec<String> {
    vec![
        "lsjson".to_string(),
        "--fast-list".to_string(),
        "--no-mimetype".to_string(),
        "--no-modtime".to_string(),
        "--config".to_string(),
        config_path.display().to_string(),
        path.to_string(),
    ]
}

/// `link` 参数
pub fn link_args(config_path: &Path, destination: &str) -> Vec<String> {
    vec![
        "link".to_string(),
        "--config".to_string(),
        config_path.display().to_string(),
        destination.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> Vec<String> {
        vec!["aria2".to_string(), "!qb".to_string()]
    }

    #[test]
    fn test_args_layout() {
        let settings = RcloneConfig::default();
        let mut cmd = RcloneCommand::new(
            &settings,
            Path::new("rclone.conf"),
            Method::Copy,
            "gd:folder",
            vec!["/downloads/x".to_string()],
            &filter(),
            None,
        );
        cmd.push_flags(&["--drive-acknowledge-abuse"]);

        let args = cmd.args();
        assert_eq!(
            &args[..7],
            &["--fast-list", "--config", "rclone.conf", "-P", "copy", "gd:folder", "/downloads/x"]
        );
        let exclude = args.iter().position(|a| a == "--exclude").unwrap();
        assert_eq!(args[exclude + 1], "*.{aria2,!qb}");
        assert_eq!(args.last().unwrap(), "--drive-acknowledge-abuse");
        assert!(!cmd.has_user_flags());
    }

    #[test]
    fn test_user_flags_win_over_global() {
        let settings = RcloneConfig {
            flags: Some("--global".to_string()),
            ..RcloneConfig::default()
        };
        let cmd = RcloneCommand::new(
            &settings,
            Path::new("c.conf"),
            Method::BackendCopyId,
            "gd:",
            vec!["ID".to_string(), "gd:dest/".to_string()],
            &filter(),
            Some("--buffer-size: 64M | --no-traverse"),
        );
        let args = cmd.args();
        assert_eq!(&args[4..8], &["backend", "copyid", "gd:", "ID"]);
        assert!(args.ends_with(&[
            "--buffer-size".to_string(),
            "64M".to_string(),
            "--no-traverse".to_string()
        ]));
        assert!(!args.contains(&"--global".to_string()));

        let global = RcloneCommand::new(&settings, Path::new("c.conf"), Method::Move, "a", vec![], &filter(), None);
        assert!(global.has_user_flags());
        assert_eq!(global.args().last().unwrap(), "--global");
    }

    #[test]
    fn test_rewrite_remote() {
        let settings = RcloneConfig::default();
        let mut cmd = RcloneCommand::new(
            &settings,
            Path::new("sa.conf"),
            Method::Move,
            "/local/file",
            vec!["sa003:path/to".to_string()],
            &filter(),
            None,
        );
        cmd.set_destination_remote("sa004");
        assert_eq!(cmd.destinations(), &["sa004:path/to".to_string()]);

        cmd.set_source_remote("x");
        assert_eq!(cmd.source(), "x:/local/file");
    }

    #[test]
    fn test_split_flags() {
        assert_eq!(
            split_flags("--a|--b:1| |--c"),
            vec!["--a", "--b", "1", "--c"]
        );
        assert!(split_flags("").is_empty());
    }

    #[test]
    fn test_auxiliary_args() {
        assert_eq!(
            lsjson_args(Path::new("r.conf"), "gd:dir"),
            vec!["lsjson", "--fast-list", "--no-mimetype", "--no-modtime", "--config", "r.conf", "gd:dir"]
        );
        assert_eq!(link_args(Path::new("r.conf"), "s3:a/b"), vec!["link", "--config", "r.conf", "s3:a/b"]);
    }
}
