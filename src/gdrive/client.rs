// Google Drive v3 REST 客户端

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::auth::{Credential, TokenSource};
use super::types::{ApiErrorResponse, DriveFile, FileListResponse, FOLDER_MIME_TYPE};
use super::DriveError;

/// Drive API 根地址
const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// 列目录每页条数
const LIST_PAGE_SIZE: &str = "200";

/// 列目录返回字段
const LIST_FIELDS: &str = "nextPageToken, files(id, name, mimeType, size, shortcutDetails)";

/// 元数据返回字段
const METADATA_FIELDS: &str = "name, id, mimeType, size";

/// 对已授权 Drive 的基本操作
#[async_trait]
pub trait DriveService: Send + Sync {
    /// 获取元数据
    async fn get_file(&self, id: &str) -> Result<DriveFile, DriveError>;

    /// 列出一页
    async fn list_page(
        &self,
        query: &str,
        page_token: Option<&str>,
    ) -> Result<FileListResponse, DriveError>;

    /// 创建文件夹
    async fn create_folder(
        &self,
        name: &str,
        parent: Option<&str>,
        description: &str,
    ) -> Result<DriveFile, DriveError>;

    /// 服务端复制
    async fn copy_file(&self, id: &str, dest: &str, name: &str) -> Result<DriveFile, DriveError>;

    /// 删除对象
    async fn delete_file(&self, id: &str) -> Result<(), DriveError>;

    /// 设置“任何人可读”
    async fn create_permission(&self, id: &str) -> Result<(), DriveError>;
}

/// 用凭证建立 Drive 会话
#[async_trait]
pub trait DriveConnector: Send + Sync {
    async fn connect(&self, credential: &Credential) -> Result<Arc<dyn DriveService>, DriveError>;
}

/// 基于 reqwest 的连接器
#[derive(Debug, Clone)]
pub struct RestConnector {
    client: Client,
}

impl RestConnector {
    pub fn new() -> Result<Self, DriveError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DriveConnector for RestConnector {
    async fn connect(&self, credential: &Credential) -> Result<Arc<dyn DriveService>, DriveError> {
        let auth = TokenSource::load(credential).await?;
        Ok(Arc::new(RestDriveService {
            client: self.client.clone(),
            auth: Arc::new(auth),
        }))
    }
}

/// REST 实现
#[derive(Debug)]
pub struct RestDriveService {
    client: Client,
    auth: Arc<TokenSource>,
}

impl RestDriveService {
    fn url(path: &str) -> String {
        format!("{}/{}", DRIVE_API_BASE, path)
    }

    /// 发送请求并检查状态码
    async fn execute(&self, request: RequestBuilder) -> Result<String, DriveError> {
        let token = self.auth.access_token(&self.client).await?;
        let response = request.bearer_auth(token).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(parse_api_error(status.as_u16(), &body));
        }
        Ok(body)
    }

    async fn execute_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, DriveError> {
        let body = self.execute(request).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// 把错误响应体解析为 `DriveError::Api`
pub(crate) fn parse_api_error(status: u16, body: &str) -> DriveError {
    match serde_json::from_str::<ApiErrorResponse>(body) {
        Ok(response) => {
            let reason = response
                .error
                .errors
                .first()
                .and_then(|detail| detail.reason.clone());
            let message = if response.error.message.is_empty() {
                response
                    .error
                    .errors
                    .first()
                    .and_then(|detail| detail.message.clone())
                    .unwrap_or_default()
            } else {
                response.error.message
            };
            DriveError::Api {
                status: if response.error.code == 0 {
                    status
                } else {
                    response.error.code
                },
                reason,
                message,
            }
        }
        Err(_) => DriveError::Api {
            status,
            reason: None,
            message: body.trim().to_string(),
        },
    }
}

#[async_trait]
impl DriveService for RestDriveService {
    async fn get_file(&self, id: &str) -> Result<DriveFile, DriveError> {
        let request = self
            .client
            .get(Self::url(&format!("files/{}", id)))
            .query(&[("supportsAllDrives", "true"), ("fields", METADATA_FIELDS)]);
        self.execute_json(request).await
    }

    async fn list_page(
        &self,
        query: &str,
        page_token: Option<&str>,
    ) -> Result<FileListResponse, DriveError> {
        let mut params = vec![
            ("supportsAllDrives", "true"),
            ("includeItemsFromAllDrives", "true"),
            ("q", query),
            ("spaces", "drive"),
            ("pageSize", LIST_PAGE_SIZE),
            ("fields", LIST_FIELDS),
            ("orderBy", "folder, name"),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        debug!("列目录: q={}, page_token={:?}", query, page_token);
        let request = self.client.get(Self::url("files")).query(&params);
        self.execute_json(request).await
    }

    async fn create_folder(
        &self,
        name: &str,
        parent: Option<&str>,
        description: &str,
    ) -> Result<DriveFile, DriveError> {
        let mut body = json!({
            "name": name,
            "description": description,
            "mimeType": FOLDER_MIME_TYPE,
        });
        if let Some(parent) = parent {
            body["parents"] = json!([parent]);
        }

        let request = self
            .client
            .post(Self::url("files"))
            .query(&[("supportsAllDrives", "true")])
            .json(&body);
        self.execute_json(request).await
    }

    async fn copy_file(&self, id: &str, dest: &str, name: &str) -> Result<DriveFile, DriveError> {
        let body = json!({ "parents": [dest], "name": name });
        let request = self
            .client
            .post(Self::url(&format!("files/{}/copy", id)))
            .query(&[("supportsAllDrives", "true")])
            .json(&body);
        self.execute_json(request).await
    }

    async fn delete_file(&self, id: &str) -> Result<(), DriveError> {
        let request = self
            .client
            .delete(Self::url(&format!("files/{}", id)))
            .query(&[("supportsAllDrives", "true")]);
        self.execute(request).await.map(|_| ())
    }

    async fn create_permission(&self, id: &str) -> Result<(), DriveError> {
        let body = json!({ "role": "reader", "type": "anyone", "withLink": true });
        let request = self
            .client
            .post(Self::url(&format!("files/{}/permissions", id)))
            .query(&[("supportsAllDrives", "true")])
            .json(&body);
        self.execute(request).await.map(|_| ())
    }
}
