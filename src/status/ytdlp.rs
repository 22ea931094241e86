// 视频下载状态

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use walkdir::WalkDir;

use super::{elapsed_string, MirrorStatus, StatusHandle, TaskHandle};
use crate::common::{eta_string, readable_file_size, readable_time};

/// 视频下载任务需要暴露的数据
#[async_trait]
pub trait VideoDownloadHandle: Send + Sync {
    /// 已下载字节数；部分格式在合并前始终为 0
    fn downloaded_bytes(&self) -> u64;
    /// 预计总大小
    fn size(&self) -> u64;
    /// 百分比（0-100）
    fn progress(&self) -> f64;
    /// 速度（字节/秒）
    fn download_speed(&self) -> f64;
    /// 下载器给出的剩余秒数
    fn eta(&self) -> Option<u64>;
    async fn cancel_task(&self);
}

/// 视频下载状态
pub struct YtDlpStatus {
    handle: Arc<dyn VideoDownloadHandle>,
    name: String,
    dir: PathBuf,
    gid: String,
    started: Instant,
}

impl YtDlpStatus {
    /// `dir` 为下载目录，下载器不报告字节数时用其实际大小
    pub fn new(
        handle: Arc<dyn VideoDownloadHandle>,
        name: impl Into<String>,
        dir: impl Into<PathBuf>,
        gid: impl Into<String>,
    ) -> Self {
        Self {
            handle,
            name: name.into(),
            dir: dir.into(),
            gid: gid.into(),
            started: Instant::now(),
        }
    }

    async fn processed_raw(&self) -> u64 {
        let downloaded = self.handle.downloaded_bytes();
        if downloaded != 0 {
            return downloaded;
        }
        path_size(&self.dir).await
    }
}

/// 目录（或文件）的总字节数
async fn path_size(path: &Path) -> u64 {
    let root = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || {
        WalkDir::new(&root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum::<u64>()
    })
    .await;

    match result {
        Ok(size) => size,
        Err(e) => {
            debug!("统计下载目录大小失败: {}", e);
            0
        }
    }
}

#[async_trait]
impl StatusHandle for YtDlpStatus {
    fn engine(&self) -> &'static str {
        "YT-DLP"
    }

    fn elapsed(&self) -> String {
        elapsed_string(self.started.elapsed())
    }

    async fn name(&self) -> String {
        self.name.clone()
    }

    async fn progress(&self) -> String {
        let progress = self.handle.progress();
        if !progress.is_finite() || progress <= 0.0 {
            return "0%".to_string();
        }
        format!("{:.2}%", progress.min(100.0))
    }

    async fn processed_bytes(&self) -> String {
        readable_file_size(self.processed_raw().await as f64)
    }

    async fn size(&self) -> String {
        readable_file_size(self.handle.size() as f64)
    }

    async fn speed(&self) -> String {
        format!("{}/s", readable_file_size(self.handle.download_speed()))
    }

    async fn eta(&self) -> String {
        if let Some(seconds) = self.handle.eta() {
            return readable_time(seconds as f64);
        }
        let remaining = self.handle.size() as f64 - self.processed_raw().await as f64;
        eta_string(remaining, self.handle.download_speed())
    }

    async fn status(&self) -> MirrorStatus {
        MirrorStatus::Downloading
    }

    async fn gid(&self) -> String {
        self.gid.clone()
    }

    fn task(&self) -> TaskHandle {
        TaskHandle::Video(Arc::clone(&self.handle))
    }

    async fn cancel_task(&self) {
        self.handle.cancel_task().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct FakeVideo {
        downloaded: u64,
        size: u64,
        speed: f64,
        eta: Option<u64>,
    }

    #[async_trait]
    impl VideoDownloadHandle for FakeVideo {
        fn downloaded_bytes(&self) -> u64 {
            self.downloaded
        }

        fn size(&self) -> u64 {
            self.size
        }

        fn progress(&self) -> f64 {
            12.5
        }

        fn download_speed(&self) -> f64 {
            self.speed
        }

        fn eta(&self) -> Option<u64> {
            self.eta
        }

        async fn cancel_task(&self) {}
    }

    #[tokio::test]
    async fn test_falls_back_to_directory_size() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("part")).unwrap();
        std::fs::write(dir.path().join("a.f137.mp4"), vec![0u8; 600]).unwrap();
        std::fs::write(dir.path().join("part/b.m4a"), vec![0u8; 424]).unwrap();

        let video = Arc::new(FakeVideo {
            downloaded: 0,
            size: 2048,
            speed: 256.0,
            eta: None,
        });
        let status = YtDlpStatus::new(video, "clip", dir.path(), "g");

        assert_eq!(status.processed_bytes().await, "1.00KB");
        // (2048 - 1024) / 256
        assert_eq!(status.eta().await, "4s");
        assert_eq!(status.progress().await, "12.50%");
        assert_eq!(status.engine(), "YT-DLP");
    }

    #[tokio::test]
    async fn test_reported_eta_wins() {
        let video = Arc::new(FakeVideo {
            downloaded: 100,
            size: 1000,
            speed: 0.0,
            eta: Some(125),
        });
        let status = YtDlpStatus::new(video, "clip", "/nonexistent", "g");

        assert_eq!(status.eta().await, "2m5s");
        assert_eq!(status.processed_bytes().await, "100.00B");
    }

    #[tokio::test]
    async fn test_unknown_speed_without_eta() {
        let video = Arc::new(FakeVideo {
            downloaded: 100,
            size: 1000,
            speed: 0.0,
            eta: None,
        });
        let status = YtDlpStatus::new(video, "clip", "/nonexistent", "g");

        assert_eq!(status.eta().await, "~");
    }
}
