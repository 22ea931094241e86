// Drive REST 克隆任务状态

use async_trait::async_trait;
use std::sync::Arc;

use super::{elapsed_string, MirrorStatus, StatusHandle, TaskHandle};
use crate::common::{eta_string, percent_string, readable_file_size};
use crate::gdrive::DriveClone;

/// Drive 克隆状态；总大小由调用方在克隆前查得
pub struct GdriveStatus {
    drive_clone: Arc<DriveClone>,
    size: u64,
    gid: String,
}

impl GdriveStatus {
    pub fn new(drive_clone: Arc<DriveClone>, size: u64, gid: impl Into<String>) -> Self {
        Self {
            drive_clone,
            size,
            gid: gid.into(),
        }
    }
}

#[async_trait]
impl StatusHandle for GdriveStatus {
    fn engine(&self) -> &'static str {
        "Google-API"
    }

    fn elapsed(&self) -> String {
        elapsed_string(self.drive_clone.elapsed())
    }

    async fn name(&self) -> String {
        self.drive_clone.name().to_string()
    }

    async fn progress(&self) -> String {
        percent_string(self.drive_clone.processed_bytes() as f64, self.size as f64)
    }

    async fn processed_bytes(&self) -> String {
        readable_file_size(self.drive_clone.processed_bytes() as f64)
    }

    async fn size(&self) -> String {
        readable_file_size(self.size as f64)
    }

    async fn speed(&self) -> String {
        format!("{}/s", readable_file_size(self.drive_clone.speed()))
    }

    async fn eta(&self) -> String {
        let remaining = self.size.saturating_sub(self.drive_clone.processed_bytes());
        eta_string(remaining as f64, self.drive_clone.speed())
    }

    async fn status(&self) -> MirrorStatus {
        MirrorStatus::Cloning
    }

    async fn gid(&self) -> String {
        self.gid.clone()
    }

    fn task(&self) -> TaskHandle {
        TaskHandle::DriveClone(Arc::clone(&self.drive_clone))
    }

    async fn cancel_task(&self) {
        self.drive_clone.cancel_task().await;
    }
}
