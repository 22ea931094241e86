// 按链接删除 Drive 对象

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::helper::DriveHelper;
use super::DriveError;
use crate::listener::UserContext;

/// 删除成功的提示
pub const DELETE_SUCCESS_MESSAGE: &str = "Successfully deleted!";

/// 删除操作
pub struct DriveDelete {
    helper: Arc<DriveHelper>,
}

impl DriveDelete {
    pub fn new(helper: Arc<DriveHelper>) -> Self {
        Self { helper }
    }

    /// 删除链接指向的对象，返回给用户的结果消息
    pub async fn delete_link(&self, link: &str, user: &UserContext) -> String {
        let mut alt_auth_tried = false;
        loop {
            let (id, ctx) = match self.helper.resolve_id(link, user) {
                Ok(resolved) => resolved,
                Err(e) => return e.to_string(),
            };
            let ctx = if alt_auth_tried {
                ctx.without_service_accounts()
            } else {
                ctx
            };

            let result: Result<(), DriveError> = async {
                let session = self.helper.authorize(&ctx, CancellationToken::new()).await?;
                session.service().delete_file(&id).await
            }
            .await;

            match result {
                Ok(()) => {
                    info!("Delete Result: {}", DELETE_SUCCESS_MESSAGE);
                    return DELETE_SUCCESS_MESSAGE.to_string();
                }
                Err(err) if err.is_not_found_or_forbidden() => {
                    if !alt_auth_tried && ctx.use_sa {
                        alt_auth_tried = true;
                        error!("File not found. Trying with token...");
                        continue;
                    }
                    let message = "File not found or insufficientFilePermissions!";
                    error!("Delete Result: {}", message);
                    return message.to_string();
                }
                Err(err) => {
                    error!("Delete Result: {}", err);
                    return err.to_string();
                }
            }
        }
    }
}
