// 聊天通道传输状态

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

use super::{elapsed_string, MirrorStatus, StatusHandle, TaskHandle};
use crate::common::{eta_string, percent_string, readable_file_size};

/// 聊天通道传输任务需要暴露的数据
#[async_trait]
pub trait ChatTransferHandle: Send + Sync {
    /// 已传输字节数
    fn processed_bytes(&self) -> u64;
    /// 当前速度（字节/秒）
    fn speed(&self) -> f64;
    async fn cancel_task(&self);
}

/// 聊天通道传输状态
pub struct TelegramStatus {
    handle: Arc<dyn ChatTransferHandle>,
    name: String,
    size: u64,
    gid: String,
    downloading: bool,
    started: Instant,
}

impl TelegramStatus {
    /// `downloading` 为 false 时表示上传
    pub fn new(
        handle: Arc<dyn ChatTransferHandle>,
        name: impl Into<String>,
        size: u64,
        gid: impl Into<String>,
        downloading: bool,
    ) -> Self {
        Self {
            handle,
            name: name.into(),
            size,
            gid: gid.into(),
            downloading,
            started: Instant::now(),
        }
    }
}

#[async_trait]
impl StatusHandle for TelegramStatus {
    fn engine(&self) -> &'static str {
        "Telegram"
    }

    fn elapsed(&self) -> String {
        elapsed_string(self.started.elapsed())
    }

    async fn name(&self) -> String {
        self.name.clone()
    }

    async fn progress(&self) -> String {
        percent_string(self.handle.processed_bytes() as f64, self.size as f64)
    }

    async fn processed_bytes(&self) -> String {
        readable_file_size(self.handle.processed_bytes() as f64)
    }

    async fn size(&self) -> String {
        readable_file_size(self.size as f64)
    }

    async fn speed(&self) -> String {
        format!("{}/s", readable_file_size(self.handle.speed()))
    }

    async fn eta(&self) -> String {
        let remaining = self.size.saturating_sub(self.handle.processed_bytes());
        eta_string(remaining as f64, self.handle.speed())
    }

    async fn status(&self) -> MirrorStatus {
        if self.downloading {
            MirrorStatus::Downloading
        } else {
            MirrorStatus::Uploading
        }
    }

    async fn gid(&self) -> String {
        self.gid.clone()
    }

    fn task(&self) -> TaskHandle {
        TaskHandle::Chat(Arc::clone(&self.handle))
    }

    async fn cancel_task(&self) {
        self.handle.cancel_task().await;
    }
}
