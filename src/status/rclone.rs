// rclone 任务状态

use async_trait::async_trait;
use std::sync::Arc;

use super::{elapsed_string, MirrorStatus, StatusHandle, TaskHandle};
use crate::rclone::RcloneTransfer;

/// rclone 任务状态，数值直接取自 `-P` 输出
pub struct RcloneStatus {
    transfer: Arc<RcloneTransfer>,
    gid: String,
    status: MirrorStatus,
}

impl RcloneStatus {
    pub fn new(transfer: Arc<RcloneTransfer>, gid: impl Into<String>, status: MirrorStatus) -> Self {
        Self {
            transfer,
            gid: gid.into(),
            status,
        }
    }
}

#[async_trait]
impl StatusHandle for RcloneStatus {
    fn engine(&self) -> &'static str {
        "Rclone"
    }

    fn elapsed(&self) -> String {
        elapsed_string(self.transfer.elapsed())
    }

    async fn name(&self) -> String {
        self.transfer.name().to_string()
    }

    async fn progress(&self) -> String {
        self.transfer.progress().percentage
    }

    async fn processed_bytes(&self) -> String {
        self.transfer.progress().transferred
    }

    async fn size(&self) -> String {
        self.transfer.progress().size
    }

    async fn speed(&self) -> String {
        self.transfer.progress().speed
    }

    async fn eta(&self) -> String {
        self.transfer.progress().eta
    }

    async fn status(&self) -> MirrorStatus {
        self.status
    }

    async fn gid(&self) -> String {
        self.gid.clone()
    }

    fn task(&self) -> TaskHandle {
        TaskHandle::Rclone(Arc::clone(&self.transfer))
    }

    async fn cancel_task(&self) {
        self.transfer.cancel_task().await;
    }
}
