//! Drive 会话与带重试的远端操作

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::auth::Credential;
use super::client::{DriveConnector, DriveService};
use super::link::{extract_id, resolve_link_mode, AuthContext};
use super::types::{DriveFile, ItemFilter};
use super::DriveError;
use crate::accounts::{AccountStore, CredentialPool, RotationCursor};
use crate::common::{retry_with_policy, RetryPolicy};
use crate::config::DriveConfig;
use crate::listener::UserContext;

/// Drive 操作的共享入口
///
/// 持有连接器、凭证池与配置；每次操作通过 [`DriveHelper::authorize`] 得到独立的会话
pub struct DriveHelper {
    connector: Arc<dyn DriveConnector>,
    accounts: Arc<AccountStore>,
    config: DriveConfig,
    use_service_accounts: bool,
    retry: RetryPolicy,
}

impl DriveHelper {
    pub fn new(
        connector: Arc<dyn DriveConnector>,
        accounts: Arc<AccountStore>,
        config: DriveConfig,
        use_service_accounts: bool,
    ) -> Self {
        let retry = RetryPolicy::from(&config.retry);
        Self {
            connector,
            accounts,
            config,
            use_service_accounts,
            retry,
        }
    }

    /// 替换重试策略
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    /// 全局配置决定的初始认证上下文
    pub fn base_context(&self) -> AuthContext {
        AuthContext::new(self.use_service_accounts, self.config.token_path.clone())
    }

    /// 用户私有令牌路径
    pub fn user_token(&self, user: &UserContext) -> Option<PathBuf> {
        user.user_id.map(|id| self.config.user_token_path(id))
    }

    /// 解析链接，得到对象 ID 与认证上下文
    pub fn resolve_id(
        &self,
        link: &str,
        user: &UserContext,
    ) -> Result<(String, AuthContext), DriveError> {
        self.resolve_id_from(link, user, self.base_context())
    }

    /// 在给定上下文基础上解析链接
    pub fn resolve_id_from(
        &self,
        link: &str,
        user: &UserContext,
        current: AuthContext,
    ) -> Result<(String, AuthContext), DriveError> {
        let user_token = self.user_token(user);
        let (link, ctx) = resolve_link_mode(link, user, current, user_token.as_deref());
        let ctx = ctx.fallback_to_user_token(user_token.as_deref());
        let id = extract_id(&link)?;
        Ok((id, ctx))
    }

    /// 按认证上下文建立会话
    pub async fn authorize(
        &self,
        ctx: &AuthContext,
        cancel: CancellationToken,
    ) -> Result<DriveSession, DriveError> {
        let (credential, pool, cursor) = if ctx.use_sa {
            let pool = self
                .accounts
                .pool()
                .await
                .ok_or_else(|| DriveError::Auth("没有可用的服务账号".to_string()))?;
            let cursor = pool.cursor();
            let path = pool
                .get(cursor.index())
                .ok_or_else(|| DriveError::Auth("服务账号编号越界".to_string()))?
                .to_path_buf();
            info!("Authorizing with {:?} service account", path.file_name());
            (Credential::ServiceAccount(path), Some(pool), Some(cursor))
        } else if ctx.token_path.exists() {
            info!("Authorize with {:?}", ctx.token_path);
            (Credential::UserToken(ctx.token_path.clone()), None, None)
        } else {
            error!("令牌文件不存在: {:?}", ctx.token_path);
            return Err(DriveError::Auth(format!(
                "token file not found: {}",
                ctx.token_path.display()
            )));
        };

        let service = self.connector.connect(&credential).await?;

        Ok(DriveSession {
            connector: self.connector.clone(),
            pool,
            use_sa: ctx.use_sa,
            is_team_drive: self.config.is_team_drive,
            description: self.config.folder_description.clone(),
            retry: self.retry.clone(),
            cancel,
            state: Mutex::new(SessionState { service, cursor }),
        })
    }
}

struct SessionState {
    service: Arc<dyn DriveService>,
    cursor: Option<RotationCursor>,
}

/// 一次顶层操作的 Drive 会话
///
/// 服务账号模式下持有本操作独占的轮换游标
pub struct DriveSession {
    connector: Arc<dyn DriveConnector>,
    pool: Option<Arc<CredentialPool>>,
    use_sa: bool,
    is_team_drive: bool,
    description: String,
    retry: RetryPolicy,
    cancel: CancellationToken,
    state: Mutex<SessionState>,
}

impl DriveSession {
    /// 当前服务
    pub(crate) fn service(&self) -> Arc<dyn DriveService> {
        self.state.lock().service.clone()
    }

    /// 是否使用服务账号
    pub fn use_sa(&self) -> bool {
        self.use_sa
    }

    /// 已轮换次数
    pub fn rotations(&self) -> usize {
        self.state
            .lock()
            .cursor
            .as_ref()
            .map(RotationCursor::rotations)
            .unwrap_or(0)
    }

    fn is_exhausted(&self) -> bool {
        self.state
            .lock()
            .cursor
            .as_ref()
            .map(RotationCursor::is_exhausted)
            .unwrap_or(true)
    }

    fn retryable(&self) -> impl Fn(&DriveError) -> bool + '_ {
        move |_: &DriveError| !self.cancel.is_cancelled()
    }

    /// 切换到下一个服务账号并重新授权
    pub async fn switch_service_account(&self) -> Result<(), DriveError> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| DriveError::Auth("当前会话未使用服务账号".to_string()))?;

        let (index, exhausted) = {
            let mut state = self.state.lock();
            match state.cursor.as_mut() {
                Some(cursor) => cursor.rotate(),
                None => (0, true),
            }
        };
        if exhausted {
            return Err(DriveError::Auth("服务账号已全部轮换".to_string()));
        }

        let path = pool
            .get(index)
            .ok_or_else(|| DriveError::Auth("服务账号编号越界".to_string()))?
            .to_path_buf();
        info!("Switching to {} index", index);

        let service = self
            .connector
            .connect(&Credential::ServiceAccount(path))
            .await?;
        self.state.lock().service = service;
        Ok(())
    }

    /// 获取元数据
    pub async fn get_metadata(&self, id: &str) -> Result<DriveFile, DriveError> {
        retry_with_policy(&self.retry, "get_metadata", self.retryable(), || async {
            self.service().get_file(id).await
        })
        .await
    }

    /// 列出文件夹下的所有条目（自动翻页）
    pub async fn list_children(
        &self,
        folder_id: &str,
        filter: ItemFilter,
    ) -> Result<Vec<DriveFile>, DriveError> {
        let query = filter.query(folder_id);
        retry_with_policy(&self.retry, "list_children", self.retryable(), || async {
            let service = self.service();
            let mut files = Vec::new();
            let mut page_token: Option<String> = None;
            loop {
                let page = service.list_page(&query, page_token.as_deref()).await?;
                files.extend(page.files);
                match page.next_page_token {
                    Some(token) => page_token = Some(token),
                    None => break,
                }
            }
            Ok::<_, DriveError>(files)
        })
        .await
    }

    /// 创建文件夹，非共享盘时设置公开权限
    pub async fn create_folder(&self, name: &str, parent: Option<&str>) -> Result<String, DriveError> {
        let folder = retry_with_policy(&self.retry, "create_folder", self.retryable(), || async {
            self.service()
                .create_folder(name, parent, &self.description)
                .await
        })
        .await?;

        if !self.is_team_drive {
            self.set_public_read_permission(&folder.id).await?;
        }
        info!("Created G-Drive Folder: name={}, id={}", folder.name, folder.id);
        Ok(folder.id)
    }

    /// 任何拿到链接的人可读
    pub async fn set_public_read_permission(&self, id: &str) -> Result<(), DriveError> {
        retry_with_policy(&self.retry, "set_permission", self.retryable(), || async {
            self.service().create_permission(id).await
        })
        .await
    }

    /// 删除对象
    pub async fn delete_object(&self, id: &str) -> Result<(), DriveError> {
        retry_with_policy(&self.retry, "delete_object", self.retryable(), || async {
            self.service().delete_file(id).await
        })
        .await
    }

    /// 清理已创建的对象
    ///
    /// 取消后仍需完成，因此只按错误类型判断是否重试，不看取消标记
    pub async fn cleanup_object(&self, id: &str) -> Result<(), DriveError> {
        retry_with_policy(&self.retry, "cleanup_object", DriveError::is_transient, || async {
            self.service().delete_file(id).await
        })
        .await
    }

    /// 复制文件
    ///
    /// 返回 `Ok(None)` 表示文件被跳过（服务端拒绝复制，或轮换前已取消）
    pub async fn copy_object(
        &self,
        id: &str,
        dest: &str,
        name: &str,
    ) -> Result<Option<DriveFile>, DriveError> {
        retry_with_policy(&self.retry, "copy_object", self.retryable(), || {
            self.copy_with_rotation(id, dest, name)
        })
        .await
    }

    async fn copy_with_rotation(
        &self,
        id: &str,
        dest: &str,
        name: &str,
    ) -> Result<Option<DriveFile>, DriveError> {
        loop {
            let err = match self.service().copy_file(id, dest, name).await {
                Ok(file) => return Ok(Some(file)),
                Err(err) => err,
            };

            if err.reason() == Some("cannotCopyFile") {
                error!("{}", err);
                return Ok(None);
            }
            if !err.is_rate_limited() {
                return Err(err);
            }
            if !self.use_sa {
                error!("Got: {}", err.reason().unwrap_or_default());
                return Err(err);
            }
            if self.is_exhausted() {
                info!(
                    "Reached maximum number of service accounts switching, which is {}",
                    self.rotations()
                );
                return Err(err);
            }
            if self.cancel.is_cancelled() {
                return Ok(None);
            }

            self.switch_service_account().await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gdrive::testing::MemoryDrive;
    use tempfile::TempDir;

    fn helper(drive: &Arc<MemoryDrive>, accounts: AccountStore, token_dir: &TempDir) -> DriveHelper {
        let token_path = token_dir.path().join("token.json");
        std::fs::write(&token_path, "{}").unwrap();
        let config = DriveConfig {
            token_path,
            user_token_dir: token_dir.path().join("tokens"),
            ..DriveConfig::default()
        };
        DriveHelper::new(drive.connector(), Arc::new(accounts), config, false)
            .with_retry(RetryPolicy::immediate(3))
    }

    fn two_accounts() -> AccountStore {
        AccountStore::with_pool(CredentialPool::from_files(
            "accounts",
            vec![PathBuf::from("accounts/a.json"), PathBuf::from("accounts/b.json")],
        ))
    }

    #[tokio::test]
    async fn test_rate_limited_copy_rotates_once() {
        let drive = MemoryDrive::new();
        let dest = drive.add_folder("dest", None);
        let src = drive.add_file("movie.mkv", None, 100);
        drive.rate_limit_connection(0);

        let tokens = TempDir::new().unwrap();
        let helper = helper(&drive, two_accounts(), &tokens);
        let session = helper
            .authorize(&AuthContext::new(true, "unused"), CancellationToken::new())
            .await
            .unwrap();

        let copied = session.copy_object(&src, &dest, "movie.mkv").await.unwrap();
        let copied = copied.expect("copy should succeed on second credential");

        assert_eq!(session.rotations(), 1);
        let credentials = drive.connections();
        assert_eq!(credentials.len(), 2);
        assert_ne!(credentials[0], credentials[1]);
        assert_eq!(drive.copied_by(&copied.id), Some(1));
    }

    #[tokio::test]
    async fn test_rotation_stops_when_exhausted() {
        let drive = MemoryDrive::new();
        let dest = drive.add_folder("dest", None);
        let src = drive.add_file("movie.mkv", None, 100);
        drive.rate_limit_all();

        let tokens = TempDir::new().unwrap();
        let helper = helper(&drive, two_accounts(), &tokens).with_retry(RetryPolicy::immediate(1));
        let session = helper
            .authorize(&AuthContext::new(true, "unused"), CancellationToken::new())
            .await
            .unwrap();

        let err = session.copy_object(&src, &dest, "movie.mkv").await.unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(session.rotations(), 2);
        assert_eq!(drive.connections().len(), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_without_service_accounts_is_error() {
        let drive = MemoryDrive::new();
        let dest = drive.add_folder("dest", None);
        let src = drive.add_file("a.bin", None, 1);
        drive.rate_limit_all();

        let tokens = TempDir::new().unwrap();
        let helper = helper(&drive, AccountStore::new("/nonexistent"), &tokens);
        let session = helper
            .authorize(&helper.base_context(), CancellationToken::new())
            .await
            .unwrap();

        let err = session.copy_object(&src, &dest, "a.bin").await.unwrap_err();
        assert!(err.to_string().contains("User rate limit exceeded"));
        assert_eq!(drive.connections().len(), 1);
    }

    #[tokio::test]
    async fn test_cannot_copy_file_is_skipped() {
        let drive = MemoryDrive::new();
        let dest = drive.add_folder("dest", None);
        let src = drive.add_file("locked.bin", None, 1);
        drive.reject_copy(&src);

        let tokens = TempDir::new().unwrap();
        let helper = helper(&drive, AccountStore::new("/nonexistent"), &tokens);
        let session = helper
            .authorize(&helper.base_context(), CancellationToken::new())
            .await
            .unwrap();

        assert!(session.copy_object(&src, &dest, "locked.bin").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_children_follows_pages() {
        let drive = MemoryDrive::new();
        let folder = drive.add_folder("src", None);
        for i in 0..5 {
            drive.add_file(&format!("f{}", i), Some(&folder), 10);
        }
        drive.add_folder("sub", Some(&folder));

        let tokens = TempDir::new().unwrap();
        let helper = helper(&drive, AccountStore::new("/nonexistent"), &tokens);
        let session = helper
            .authorize(&helper.base_context(), CancellationToken::new())
            .await
            .unwrap();

        let all = session.list_children(&folder, ItemFilter::All).await.unwrap();
        assert_eq!(all.len(), 6);
        let folders = session
            .list_children(&folder, ItemFilter::Folders)
            .await
            .unwrap();
        assert_eq!(folders.len(), 1);
        assert!(drive.list_calls() > 2);
    }

    #[tokio::test]
    async fn test_create_folder_sets_permission_unless_team_drive() {
        let drive = MemoryDrive::new();
        let tokens = TempDir::new().unwrap();
        let helper = helper(&drive, AccountStore::new("/nonexistent"), &tokens);
        let session = helper
            .authorize(&helper.base_context(), CancellationToken::new())
            .await
            .unwrap();

        let id = session.create_folder("new", None).await.unwrap();
        assert_eq!(drive.permissions(), vec![id]);
    }

    #[tokio::test]
    async fn test_authorize_without_token_fails() {
        let drive = MemoryDrive::new();
        let helper = DriveHelper::new(
            drive.connector(),
            Arc::new(AccountStore::new("/nonexistent")),
            DriveConfig {
                token_path: PathBuf::from("/nonexistent/token.json"),
                ..DriveConfig::default()
            },
            false,
        );

        let result = helper
            .authorize(&helper.base_context(), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(DriveError::Auth(_))));
    }
}
