//! Drive 服务端克隆
//!
//! 文件直接复制；文件夹按层级递归创建后逐个复制文件。
//! 取消后删除已创建的目标根目录，不回调完成事件。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::helper::{DriveHelper, DriveSession};
use super::link::{resolve_destination_mode, AuthContext};
use super::types::{file_url, folder_url, CloneOutcome, CloneStats, ItemFilter};
use super::DriveError;
use crate::common::sanitize_message;
use crate::listener::{TaskListener, TransferRequest, UploadResult};

/// 克隆被取消时的提示
pub const CLONE_CANCELLED_MESSAGE: &str =
    "Your clone has been stopped and cloned data has been deleted!";

/// 把错误转换为发给用户的消息
pub fn clone_error_message(err: &DriveError) -> String {
    let text = sanitize_message(&err.to_string());
    if text.contains("User rate limit exceeded") {
        "User rate limit exceeded.".to_string()
    } else if text.contains("File not found") {
        "File not found.".to_string()
    } else {
        format!("Error.\n{}", text)
    }
}

/// 一次克隆任务
pub struct DriveClone {
    helper: Arc<DriveHelper>,
    request: TransferRequest,
    listener: Arc<dyn TaskListener>,
    cancel: CancellationToken,
    /// 已复制字节数（供状态查询）
    processed: AtomicU64,
    started: Instant,
}

impl DriveClone {
    pub fn new(
        helper: Arc<DriveHelper>,
        request: TransferRequest,
        listener: Arc<dyn TaskListener>,
    ) -> Self {
        Self {
            helper,
            request,
            listener,
            cancel: CancellationToken::new(),
            processed: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.request.name
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 已处理字节数
    pub fn processed_bytes(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// 平均速度（字节/秒）
    pub fn speed(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs <= 0.0 {
            0.0
        } else {
            self.processed_bytes() as f64 / secs
        }
    }

    /// 执行克隆
    ///
    /// 成功时回调 `on_upload_complete` 并返回结果；失败回调 `on_upload_error`；
    /// 取消返回 None 且不回调
    pub async fn execute(&self) -> Option<CloneOutcome> {
        let user_token = self.helper.user_token(&self.request.user);
        let (dest, base) = resolve_destination_mode(
            &self.request.up_dest,
            &self.request.link,
            &self.request.user,
            self.helper.base_context(),
            user_token.as_deref(),
        );

        let mut alt_auth_tried = false;
        loop {
            let (file_id, ctx) =
                match self
                    .helper
                    .resolve_id_from(&self.request.link, &self.request.user, base.clone())
                {
                    Ok(resolved) => resolved,
                    Err(e) => {
                        self.listener.on_upload_error(e.to_string()).await;
                        return None;
                    }
                };
            let ctx = if alt_auth_tried {
                ctx.without_service_accounts()
            } else {
                ctx
            };

            match self.clone_once(&file_id, &dest, &ctx).await {
                Ok(Some(outcome)) => {
                    self.listener
                        .on_upload_complete(UploadResult {
                            link: outcome.link.clone(),
                            size: outcome.size,
                            files: outcome.files,
                            folders: outcome.folders,
                            mime_type: outcome.mime_type.clone(),
                            destination: dest.clone(),
                        })
                        .await;
                    return Some(outcome);
                }
                Ok(None) => return None,
                Err(err) if self.cancel.is_cancelled() => {
                    info!("克隆已取消，忽略错误: {}", err);
                    return None;
                }
                Err(err) => {
                    if err.is_not_found() && ctx.use_sa && !alt_auth_tried {
                        alt_auth_tried = true;
                        error!("File not found. Trying with token...");
                        continue;
                    }
                    let message = clone_error_message(&err);
                    error!("克隆失败: {}", message);
                    self.listener.on_upload_error(message).await;
                    return None;
                }
            }
        }
    }

    async fn clone_once(
        &self,
        file_id: &str,
        dest: &str,
        ctx: &AuthContext,
    ) -> Result<Option<CloneOutcome>, DriveError> {
        let session = self.helper.authorize(ctx, self.cancel.clone()).await?;
        info!("File ID: {}", file_id);

        let meta = session.get_metadata(file_id).await?;
        if meta.is_folder() {
            let dir_id = session.create_folder(&meta.name, Some(dest)).await?;
            let mut stats = CloneStats::default();
            let walked = self
                .clone_folder(&session, &meta.name, &meta.id, &dir_id, &mut stats)
                .await;

            // 取消时不论遍历是否出错都要删除目标根目录
            if self.cancel.is_cancelled() {
                info!("Deleting cloned data from Drive...");
                if let Err(e) = session.cleanup_object(&dir_id).await {
                    error!("删除已克隆数据失败: {}", e);
                }
                return Ok(None);
            }
            walked?;

            return Ok(Some(CloneOutcome {
                link: folder_url(&dir_id),
                size: stats.bytes,
                mime_type: "Folder".to_string(),
                files: stats.files,
                folders: stats.folders,
                id: dir_id,
            }));
        }

        let name = self
            .request
            .new_name
            .clone()
            .unwrap_or_else(|| meta.name.clone());
        match session.copy_object(&meta.id, dest, &name).await? {
            Some(file) => {
                let size = meta.size_or_zero();
                self.processed.fetch_add(size, Ordering::Relaxed);
                info!("已复制文件: {}", file.name);
                Ok(Some(CloneOutcome {
                    link: file_url(&file.id),
                    size,
                    mime_type: meta.mime_type.unwrap_or_else(|| "File".to_string()),
                    files: 1,
                    folders: 0,
                    id: file.id,
                }))
            }
            None if self.cancel.is_cancelled() => Ok(None),
            None => Err(DriveError::CopyRejected(meta.name)),
        }
    }

    /// 递归克隆文件夹内容
    #[async_recursion::async_recursion]
    async fn clone_folder(
        &self,
        session: &DriveSession,
        folder_name: &str,
        folder_id: &str,
        dest_id: &str,
        stats: &mut CloneStats,
    ) -> Result<(), DriveError> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        info!("Syncing: {}", folder_name);
        let children = session.list_children(folder_id, ItemFilter::All).await?;

        for child in children {
            if child.is_folder() {
                stats.folders += 1;
                let child_path = format!("{}/{}", folder_name, child.name);
                let child_dest = session.create_folder(&child.name, Some(dest_id)).await?;
                self.clone_folder(session, &child_path, &child.id, &child_dest, stats)
                    .await?;
            } else if !self.request.is_excluded(&child.name) {
                // 先计数再复制，被服务端拒绝复制（跳过）的文件也计入
                stats.files += 1;
                session.copy_object(&child.id, dest_id, &child.name).await?;
                let size = child.size_or_zero();
                stats.bytes += size;
                self.processed.fetch_add(size, Ordering::Relaxed);
            }

            if self.cancel.is_cancelled() {
                break;
            }
        }
        Ok(())
    }

    /// 取消克隆
    pub async fn cancel_task(&self) {
        self.cancel.cancel();
        info!("Cancelling Clone: {}", self.request.name);
        self.listener
            .on_upload_error(CLONE_CANCELLED_MESSAGE.to_string())
            .await;
    }
}
