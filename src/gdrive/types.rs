// Google Drive API 数据类型

use serde::{Deserialize, Deserializer, Serialize};

/// 文件夹的 MIME 类型
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// 文件直链模板
const FILE_URL_TEMPLATE: &str = "https://drive.google.com/uc?id={}&export=download";

/// 文件夹链接模板
const FOLDER_URL_TEMPLATE: &str = "https://drive.google.com/drive/folders/{}";

/// 文件直链
pub fn file_url(id: &str) -> String {
    FILE_URL_TEMPLATE.replace("{}", id)
}

/// 文件夹链接
pub fn folder_url(id: &str) -> String {
    FOLDER_URL_TEMPLATE.replace("{}", id)
}

/// 文件元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    /// 对象 ID
    pub id: String,

    /// 名称
    #[serde(default)]
    pub name: String,

    /// MIME 类型
    #[serde(default)]
    pub mime_type: Option<String>,

    /// 大小（API 以字符串返回，文件夹没有）
    #[serde(default, deserialize_with = "deserialize_size")]
    pub size: Option<u64>,
}

impl DriveFile {
    /// 是否是文件夹
    pub fn is_folder(&self) -> bool {
        self.mime_type.as_deref() == Some(FOLDER_MIME_TYPE)
    }

    /// 大小，缺失按 0 计
    pub fn size_or_zero(&self) -> u64 {
        self.size.unwrap_or(0)
    }
}

fn deserialize_size<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SizeValue {
        Text(String),
        Number(u64),
    }

    match Option::<SizeValue>::deserialize(deserializer)? {
        None => Ok(None),
        Some(SizeValue::Number(n)) => Ok(Some(n)),
        Some(SizeValue::Text(s)) => s
            .parse::<u64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// 列目录响应
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListResponse {
    /// 下一页标记
    #[serde(default)]
    pub next_page_token: Option<String>,

    /// 本页文件
    #[serde(default)]
    pub files: Vec<DriveFile>,
}

/// API 错误响应体
#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorDetail {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// 列目录时的类型过滤
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemFilter {
    #[default]
    All,
    Folders,
    Files,
}

impl ItemFilter {
    /// 生成查询语句
    pub fn query(&self, folder_id: &str) -> String {
        match self {
            ItemFilter::All => format!("'{}' in parents and trashed = false", folder_id),
            ItemFilter::Folders => format!(
                "'{}' in parents and mimeType = '{}' and trashed = false",
                folder_id, FOLDER_MIME_TYPE
            ),
            ItemFilter::Files => format!(
                "'{}' in parents and mimeType != '{}' and trashed = false",
                folder_id, FOLDER_MIME_TYPE
            ),
        }
    }
}

/// 递归克隆的累计值
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloneStats {
    /// 已复制文件数
    pub files: u64,
    /// 已创建子文件夹数
    pub folders: u64,
    /// 已复制字节数
    pub bytes: u64,
}

/// 克隆结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneOutcome {
    /// 访问链接
    pub link: String,
    /// 总大小
    pub size: u64,
    /// `Folder`、原 MIME 或 `File`
    pub mime_type: String,
    pub files: u64,
    pub folders: u64,
    /// 目标对象 ID
    pub id: String,
}
