//! 任务监听接口与传输请求
//!
//! 引擎的所有结果只通过 [`TaskListener`] 的四个回调离开核心

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 默认排除的扩展名（下载器残留文件）
pub const DEFAULT_EXTENSION_FILTER: [&str; 2] = ["aria2", "!qb"];

/// 上传 / 克隆完成结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    /// 访问链接（解析失败时为空）
    pub link: String,
    /// 总字节数
    pub size: u64,
    /// 文件数
    pub files: u64,
    /// 文件夹数
    pub folders: u64,
    /// 类型（`Folder` 或 MIME）
    pub mime_type: String,
    /// 目标路径
    pub destination: String,
}

/// 任务监听器，由外部任务层实现
#[async_trait]
pub trait TaskListener: Send + Sync {
    async fn on_download_complete(&self);
    async fn on_download_error(&self, message: String);
    async fn on_upload_complete(&self, result: UploadResult);
    async fn on_upload_error(&self, message: String);
}

/// 发起请求的用户上下文
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserContext {
    /// 用户 ID
    pub user_id: Option<i64>,
    /// 用户偏好：默认使用服务账号
    pub prefers_service_account: bool,
    /// 私有链接（使用用户自己的令牌）
    pub private_link: bool,
}

/// 一次传输请求
///
/// 请求本身不可变；认证模式、取消状态等运行时状态由各引擎显式持有
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// 源：链接、ID 或本地路径
    pub link: String,
    /// 目标（可能带 `mtp:` / `tp:` / `sa:` / `mrcc:` 前缀）
    pub up_dest: String,
    /// 显示名称
    pub name: String,
    /// 重命名
    pub new_name: Option<String>,
    /// 排除的扩展名（小写）
    pub extension_filter: Vec<String>,
    /// 用户上下文
    pub user: UserContext,
    /// 用户附加的 rclone 参数
    pub rc_flags: Option<String>,
    /// 完成后做种（上传时保留源文件）
    pub seed: bool,
    /// 上传到新目录
    pub new_dir: bool,
}

impl TransferRequest {
    pub fn new(link: impl Into<String>, up_dest: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            up_dest: up_dest.into(),
            name: name.into(),
            new_name: None,
            extension_filter: DEFAULT_EXTENSION_FILTER
                .iter()
                .map(|s| s.to_string())
                .collect(),
            user: UserContext::default(),
            rc_flags: None,
            seed: false,
            new_dir: false,
        }
    }

    /// 追加排除扩展名（统一转为小写）
    pub fn with_extension_filter<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for ext in extensions {
            let ext = ext.as_ref().trim().trim_start_matches('.').to_lowercase();
            if !ext.is_empty() && !self.extension_filter.contains(&ext) {
                self.extension_filter.push(ext);
            }
        }
        self
    }

    pub fn with_user(mut self, user: UserContext) -> Self {
        self.user = user;
        self
    }

    pub fn with_new_name(mut self, new_name: impl Into<String>) -> Self {
        self.new_name = Some(new_name.into());
        self
    }

    pub fn with_rc_flags(mut self, flags: impl Into<String>) -> Self {
        let flags = flags.into();
        self.rc_flags = if flags.trim().is_empty() {
            None
        } else {
            Some(flags)
        };
        self
    }

    pub fn with_seed(mut self, seed: bool) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_new_dir(mut self, new_dir: bool) -> Self {
        self.new_dir = new_dir;
        self
    }

    /// 名称是否命中排除列表（大小写不敏感的后缀匹配）
    pub fn is_excluded(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.extension_filter
            .iter()
            .any(|ext| lower.ends_with(ext.as_str()))
    }

    /// 用户自定义的排除项（去掉内置默认值）
    pub fn custom_extensions(&self) -> Vec<&str> {
        self.extension_filter
            .iter()
            .map(String::as_str)
            .filter(|ext| !DEFAULT_EXTENSION_FILTER.contains(ext))
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// 监听器收到的事件
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ListenerEvent {
        DownloadComplete,
        DownloadError(String),
        UploadComplete(UploadResult),
        UploadError(String),
    }

    /// 记录所有回调的监听器
    #[derive(Debug, Default)]
    pub struct RecordingListener {
        events: Mutex<Vec<ListenerEvent>>,
    }

    impl RecordingListener {
        pub fn events(&self) -> Vec<ListenerEvent> {
            self.events.lock().clone()
        }
    }

    #[async_trait]
    impl TaskListener for RecordingListener {
        async fn on_download_complete(&self) {
            self.events.lock().push(ListenerEvent::DownloadComplete);
        }

        async fn on_download_error(&self, message: String) {
            self.events.lock().push(ListenerEvent::DownloadError(message));
        }

        async fn on_upload_complete(&self, result: UploadResult) {
            self.events.lock().push(ListenerEvent::UploadComplete(result));
        }

        async fn on_upload_error(&self, message: String) {
            self.events.lock().push(ListenerEvent::UploadError(message));
        }
    }
}
