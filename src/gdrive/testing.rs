// 内存中的 Drive，替代 REST 服务

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::auth::Credential;
use super::client::{DriveConnector, DriveService};
use super::types::{DriveFile, FileListResponse, FOLDER_MIME_TYPE};
use super::DriveError;

/// 每页条数，故意取小值以触发翻页
const PAGE_SIZE: usize = 2;

#[derive(Debug, Clone)]
struct Entry {
    file: DriveFile,
    parent: Option<String>,
    /// 创建该对象的连接编号（复制产生的对象）
    created_by: Option<usize>,
}

#[derive(Default)]
struct State {
    entries: BTreeMap<String, Entry>,
    next_id: u64,
    connections: Vec<Credential>,
    rate_limited: HashSet<usize>,
    rate_limit_all: bool,
    rejected: HashSet<String>,
    hide_from_service_accounts: bool,
    reverse_listing: bool,
    list_calls: usize,
    permissions: Vec<String>,
    created_folders: usize,
    cancel_after_folders: Option<(usize, CancellationToken)>,
    cancel_on_copy: Option<CancellationToken>,
    failing_deletes: usize,
    delete_calls: usize,
}

impl State {
    fn allocate(&mut self) -> String {
        self.next_id += 1;
        format!("obj{:016}", self.next_id)
    }

    fn not_found(id: &str) -> DriveError {
        DriveError::Api {
            status: 404,
            reason: Some("notFound".to_string()),
            message: format!("File not found: {}.", id),
        }
    }

    fn children(&self, parent: &str) -> Vec<&Entry> {
        let mut children: Vec<&Entry> = self
            .entries
            .values()
            .filter(|e| e.parent.as_deref() == Some(parent))
            .collect();
        if self.reverse_listing {
            children.reverse();
        }
        children
    }

    fn remove_tree(&mut self, id: &str) {
        let children: Vec<String> = self
            .entries
            .values()
            .filter(|e| e.parent.as_deref() == Some(id))
            .map(|e| e.file.id.clone())
            .collect();
        for child in children {
            self.remove_tree(&child);
        }
        self.entries.remove(id);
    }

    fn count_descendants(&self, id: &str) -> usize {
        self.entries
            .values()
            .filter(|e| e.parent.as_deref() == Some(id))
            .map(|e| 1 + self.count_descendants(&e.file.id))
            .sum()
    }
}

/// 内存 Drive
#[derive(Default)]
pub struct MemoryDrive {
    state: Mutex<State>,
}

impl MemoryDrive {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn DriveConnector> {
        Arc::new(MemoryConnector {
            drive: Arc::clone(self),
        })
    }

    fn insert(&self, name: &str, parent: Option<&str>, mime: &str, size: Option<u64>) -> String {
        let mut state = self.state.lock();
        let id = state.allocate();
        state.entries.insert(
            id.clone(),
            Entry {
                file: DriveFile {
                    id: id.clone(),
                    name: name.to_string(),
                    mime_type: Some(mime.to_string()),
                    size,
                },
                parent: parent.map(str::to_string),
                created_by: None,
            },
        );
        id
    }

    pub fn add_folder(&self, name: &str, parent: Option<&str>) -> String {
        self.insert(name, parent, FOLDER_MIME_TYPE, None)
    }

    pub fn add_file(&self, name: &str, parent: Option<&str>, size: u64) -> String {
        self.insert(name, parent, "application/octet-stream", Some(size))
    }

    /// 指定连接的复制请求全部限流
    pub fn rate_limit_connection(&self, index: usize) {
        self.state.lock().rate_limited.insert(index);
    }

    pub fn rate_limit_all(&self) {
        self.state.lock().rate_limit_all = true;
    }

    /// 复制该对象时返回 cannotCopyFile
    pub fn reject_copy(&self, id: &str) {
        self.state.lock().rejected.insert(id.to_string());
    }

    /// 服务账号看不到任何对象
    pub fn hide_from_service_accounts(&self) {
        self.state.lock().hide_from_service_accounts = true;
    }

    pub fn reverse_listing(&self) {
        self.state.lock().reverse_listing = true;
    }

    /// 创建第 n 个文件夹后触发取消
    pub fn cancel_after_folders(&self, n: usize, token: CancellationToken) {
        self.state.lock().cancel_after_folders = Some((n, token));
    }

    /// 下一次复制触发取消并返回 500
    pub fn fail_copy_with_cancel(&self, token: CancellationToken) {
        self.state.lock().cancel_on_copy = Some(token);
    }

    /// 前 n 次删除返回 503
    pub fn fail_deletes(&self, n: usize) {
        self.state.lock().failing_deletes = n;
    }

    pub fn delete_calls(&self) -> usize {
        self.state.lock().delete_calls
    }

    pub fn connections(&self) -> Vec<Credential> {
        self.state.lock().connections.clone()
    }

    pub fn copied_by(&self, id: &str) -> Option<usize> {
        self.state.lock().entries.get(id).and_then(|e| e.created_by)
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().list_calls
    }

    pub fn permissions(&self) -> Vec<String> {
        self.state.lock().permissions.clone()
    }

    pub fn exists(&self, id: &str) -> bool {
        self.state.lock().entries.contains_key(id)
    }

    pub fn descendants(&self, id: &str) -> usize {
        self.state.lock().count_descendants(id)
    }

    /// 按名称取子对象
    pub fn child_named(&self, parent: &str, name: &str) -> Option<DriveFile> {
        let state = self.state.lock();
        state
            .children(parent)
            .into_iter()
            .find(|e| e.file.name == name)
            .map(|e| e.file.clone())
    }
}

struct MemoryConnector {
    drive: Arc<MemoryDrive>,
}

#[async_trait]
impl DriveConnector for MemoryConnector {
    async fn connect(&self, credential: &Credential) -> Result<Arc<dyn DriveService>, DriveError> {
        let index = {
            let mut state = self.drive.state.lock();
            state.connections.push(credential.clone());
            state.connections.len() - 1
        };
        Ok(Arc::new(MemoryService {
            drive: Arc::clone(&self.drive),
            index,
            service_account: matches!(credential, Credential::ServiceAccount(_)),
        }))
    }
}

struct MemoryService {
    drive: Arc<MemoryDrive>,
    index: usize,
    service_account: bool,
}

impl MemoryService {
    fn check_visible(&self, state: &State, id: &str) -> Result<(), DriveError> {
        if (self.service_account && state.hide_from_service_accounts)
            || !state.entries.contains_key(id)
        {
            return Err(State::not_found(id));
        }
        Ok(())
    }
}

/// 从 `'<id>' in parents ...` 中取出父 ID
fn parent_from_query(query: &str) -> Option<&str> {
    let rest = query.strip_prefix('\'')?;
    rest.split('\'').next()
}

#[async_trait]
impl DriveService for MemoryService {
    async fn get_file(&self, id: &str) -> Result<DriveFile, DriveError> {
        let state = self.drive.state.lock();
        self.check_visible(&state, id)?;
        state
            .entries
            .get(id)
            .map(|e| e.file.clone())
            .ok_or_else(|| State::not_found(id))
    }

    async fn list_page(
        &self,
        query: &str,
        page_token: Option<&str>,
    ) -> Result<FileListResponse, DriveError> {
        let mut state = self.drive.state.lock();
        state.list_calls += 1;

        let parent = parent_from_query(query).unwrap_or_default().to_string();
        self.check_visible(&state, &parent)?;

        let only_folders = query.contains("mimeType = ");
        let only_files = query.contains("mimeType != ");
        let matching: Vec<DriveFile> = state
            .children(&parent)
            .into_iter()
            .filter(|e| {
                let is_folder = e.file.is_folder();
                (!only_folders || is_folder) && (!only_files || !is_folder)
            })
            .map(|e| e.file.clone())
            .collect();

        let offset: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = (offset + PAGE_SIZE).min(matching.len());
        let next_page_token = (end < matching.len()).then(|| end.to_string());

        Ok(FileListResponse {
            next_page_token,
            files: matching[offset.min(end)..end].to_vec(),
        })
    }

    async fn create_folder(
        &self,
        name: &str,
        parent: Option<&str>,
        _description: &str,
    ) -> Result<DriveFile, DriveError> {
        let mut state = self.drive.state.lock();
        if let Some(parent) = parent {
            if !state.entries.contains_key(parent) {
                return Err(State::not_found(parent));
            }
        }

        let id = state.allocate();
        let file = DriveFile {
            id: id.clone(),
            name: name.to_string(),
            mime_type: Some(FOLDER_MIME_TYPE.to_string()),
            size: None,
        };
        state.entries.insert(
            id,
            Entry {
                file: file.clone(),
                parent: parent.map(str::to_string),
                created_by: Some(self.index),
            },
        );

        state.created_folders += 1;
        if let Some((n, token)) = &state.cancel_after_folders {
            if state.created_folders >= *n {
                token.cancel();
            }
        }
        Ok(file)
    }

    async fn copy_file(&self, id: &str, dest: &str, name: &str) -> Result<DriveFile, DriveError> {
        let mut state = self.drive.state.lock();
        if let Some(token) = state.cancel_on_copy.take() {
            token.cancel();
            return Err(DriveError::Api {
                status: 500,
                reason: Some("backendError".to_string()),
                message: "Backend Error".to_string(),
            });
        }
        if state.rate_limit_all || state.rate_limited.contains(&self.index) {
            return Err(DriveError::Api {
                status: 403,
                reason: Some("userRateLimitExceeded".to_string()),
                message: "User rate limit exceeded.".to_string(),
            });
        }
        if state.rejected.contains(id) {
            return Err(DriveError::Api {
                status: 403,
                reason: Some("cannotCopyFile".to_string()),
                message: "This file cannot be copied by the user.".to_string(),
            });
        }
        self.check_visible(&state, id)?;
        if !state.entries.contains_key(dest) {
            return Err(State::not_found(dest));
        }

        let source = state
            .entries
            .get(id)
            .map(|e| e.file.clone())
            .ok_or_else(|| State::not_found(id))?;
        let new_id = state.allocate();
        let file = DriveFile {
            id: new_id.clone(),
            name: name.to_string(),
            ..source
        };
        state.entries.insert(
            new_id,
            Entry {
                file: file.clone(),
                parent: Some(dest.to_string()),
                created_by: Some(self.index),
            },
        );
        Ok(file)
    }

    async fn delete_file(&self, id: &str) -> Result<(), DriveError> {
        let mut state = self.drive.state.lock();
        state.delete_calls += 1;
        if state.failing_deletes > 0 {
            state.failing_deletes -= 1;
            return Err(DriveError::Api {
                status: 503,
                reason: None,
                message: "Service Unavailable".to_string(),
            });
        }
        self.check_visible(&state, id)?;
        state.remove_tree(id);
        Ok(())
    }

    async fn create_permission(&self, id: &str) -> Result<(), DriveError> {
        let mut state = self.drive.state.lock();
        if !state.entries.contains_key(id) {
            return Err(State::not_found(id));
        }
        state.permissions.push(id.to_string());
        Ok(())
    }
}
