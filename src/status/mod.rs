//! 任务状态适配层
//!
//! 不同引擎的任务统一投影成 [`StatusHandle`]，供外部的状态面板轮询

pub mod aria2;
pub mod gdrive;
pub mod rclone;
pub mod telegram;
pub mod ytdlp;

pub use aria2::{Aria2Download, Aria2Error, Aria2Rpc, Aria2Status};
pub use gdrive::GdriveStatus;
pub use rclone::RcloneStatus;
pub use telegram::{ChatTransferHandle, TelegramStatus};
pub use ytdlp::{VideoDownloadHandle, YtDlpStatus};

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::common::readable_time;
use crate::gdrive::DriveClone;
use crate::rclone::RcloneTransfer;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MirrorStatus {
    QueuedDownload,
    Downloading,
    Uploading,
    Paused,
    Seeding,
    QueuedUpload,
    Cloning,
}

impl fmt::Display for MirrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            MirrorStatus::QueuedDownload => "QueueDl",
            MirrorStatus::Downloading => "Download",
            MirrorStatus::Uploading => "Upload",
            MirrorStatus::Paused => "Pause",
            MirrorStatus::Seeding => "Seed",
            MirrorStatus::QueuedUpload => "QueueUp",
            MirrorStatus::Cloning => "Clone",
        };
        f.write_str(text)
    }
}

/// 状态背后的任务对象
#[derive(Clone)]
pub enum TaskHandle {
    Rclone(Arc<RcloneTransfer>),
    DriveClone(Arc<DriveClone>),
    /// aria2 下载（当前 gid）
    Aria2(String),
    Chat(Arc<dyn ChatTransferHandle>),
    Video(Arc<dyn VideoDownloadHandle>),
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskHandle::Rclone(t) => write!(f, "Rclone({})", t.name()),
            TaskHandle::DriveClone(t) => write!(f, "DriveClone({})", t.name()),
            TaskHandle::Aria2(gid) => write!(f, "Aria2({})", gid),
            TaskHandle::Chat(_) => f.write_str("Chat"),
            TaskHandle::Video(_) => f.write_str("Video"),
        }
    }
}

/// 统一的任务状态接口
///
/// 返回值都是展示用字符串；百分比默认 `0%`，无法估算的 ETA 为 `~`
#[async_trait]
pub trait StatusHandle: Send + Sync {
    /// 引擎名称
    fn engine(&self) -> &'static str;

    /// 已运行时长
    fn elapsed(&self) -> String;

    async fn name(&self) -> String;
    async fn progress(&self) -> String;
    async fn processed_bytes(&self) -> String;
    async fn size(&self) -> String;
    async fn speed(&self) -> String;
    async fn eta(&self) -> String;
    async fn status(&self) -> MirrorStatus;
    async fn gid(&self) -> String;

    /// 底层任务对象
    fn task(&self) -> TaskHandle;

    async fn cancel_task(&self);
}

/// 生成状态 gid
pub fn new_gid() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

pub(crate) fn elapsed_string(elapsed: Duration) -> String {
    readable_time(elapsed.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text() {
        assert_eq!(MirrorStatus::QueuedDownload.to_string(), "QueueDl");
        assert_eq!(MirrorStatus::Cloning.to_string(), "Clone");
        assert_eq!(MirrorStatus::Seeding.to_string(), "Seed");
    }

    #[test]
    fn test_new_gid() {
        let a = new_gid();
        assert_eq!(a.len(), 12);
        assert_ne!(a, new_gid());
    }

    #[test]
    fn test_elapsed_string() {
        assert_eq!(elapsed_string(Duration::from_secs(65)), "1m5s");
    }
}
